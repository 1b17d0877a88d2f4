//! Password prompts.

use anyhow::{Context, Result};
use inquire::validator::MinLengthValidator;
use inquire::{Password as PasswordPrompt, PasswordDisplayMode};
use strongbox::Password;
use strongbox::types::Processing;

pub struct Prompt {
    password_min_length: usize,
}

impl Prompt {
    pub fn new(password_min_length: usize) -> Self {
        Self { password_min_length }
    }

    /// Asks for the session password.
    ///
    /// Encryption asks twice and enforces the minimum length up front;
    /// decryption takes whatever is typed and lets authentication decide.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal cannot be read or the prompt is cancelled.
    pub fn password(&self, processing: Processing) -> Result<Password> {
        let password = match processing {
            Processing::Encryption => PasswordPrompt::new("Enter encryption password:")
                .with_display_mode(PasswordDisplayMode::Masked)
                .with_custom_confirmation_message("Confirm password:")
                .with_custom_confirmation_error_message("passwords do not match")
                .with_validator(MinLengthValidator::new(self.password_min_length).with_message(format!("password must be at least {} characters", self.password_min_length)))
                .prompt(),
            Processing::Decryption => PasswordPrompt::new("Enter decryption password:").with_display_mode(PasswordDisplayMode::Masked).without_confirmation().prompt(),
        };

        password.map(Password::from_string).context("failed to read password")
    }
}
