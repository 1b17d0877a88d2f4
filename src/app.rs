use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strongbox::config::{FILE_EXTENSION, PASSWORD_MIN_LENGTH};
use strongbox::types::{Compression, Processing};
use strongbox::{CancellationToken, EncryptionConfig, Password, Processor};
use tracing_subscriber::EnvFilter;

use crate::ui::progress::Bar;
use crate::ui::prompt::Prompt;

#[derive(Subcommand)]
pub enum Commands {
    /// Seal files and directories into one container.
    Encrypt {
        /// Inputs followed by the container to create; `.sbx` is appended to a container name without extension.
        #[arg(required = true, num_args = 2.., value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Extract a container into an existing directory.
    Decrypt {
        input: PathBuf,

        output_dir: PathBuf,
    },
}

#[derive(Parser)]
#[command(name = "strongbox", version, about = "Compress and encrypt files and directories into a single XChaCha20-Poly1305 container.")]
pub struct App {
    #[command(subcommand)]
    command: Commands,

    /// Only print errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Abort the operation after this many seconds.
    #[arg(short, long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Archive compression (zstd or gzip); decryption needs the one used to encrypt.
    #[arg(short, long, global = true, default_value_t = Compression::Zstd)]
    compression: Compression,
}

impl App {
    pub fn init() -> Result<Self> {
        let app = Self::parse();
        let default = if app.quiet { "error" } else { "warn" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_file(true).with_line_number(true).with_writer(io::stderr).finish();
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(app)
    }

    pub async fn execute(self) -> Result<()> {
        let config = EncryptionConfig { compression: self.compression, ..EncryptionConfig::default() };
        let mut processor = Processor::new(config)?;
        if let Some(secs) = self.timeout {
            processor = processor.with_timeout(Duration::from_secs(secs));
        }

        let (processing, target) = match &self.command {
            Commands::Encrypt { paths } => (Processing::Encryption, paths.last().map(|output| container_path(output)).unwrap_or_default()),
            Commands::Decrypt { output_dir, .. } => (Processing::Decryption, output_dir.clone()),
        };

        let password = Self::read_password(processing)?;
        let bar = (!self.quiet).then(|| Bar::attach(processor.status(), processing));
        let cancel = CancellationToken::new();

        let result = match &self.command {
            Commands::Encrypt { paths } => {
                let Some((output, inputs)) = paths.split_last() else { bail!("missing output path") };
                let output = container_path(output);
                processor.encrypt(inputs, &output, &password, &cancel).await.with_context(|| format!("encryption into {} failed", output.display()))
            }
            Commands::Decrypt { input, output_dir } => processor.decrypt(input, output_dir, &password, &cancel).await.with_context(|| format!("decryption of {} failed", input.display())),
        };
        drop(bar);
        result?;

        if !self.quiet {
            crate::ui::show_success(processing, &target);
        }
        Ok(())
    }

    /// Reads the first line of stdin when it is piped, otherwise prompts.
    fn read_password(processing: Processing) -> Result<Password> {
        let stdin = io::stdin();
        if stdin.is_terminal() {
            return Prompt::new(PASSWORD_MIN_LENGTH).password(processing);
        }

        let mut line = String::new();
        stdin.lock().read_line(&mut line).context("failed to read password from stdin")?;
        let password = line.trim_end_matches(['\r', '\n']);
        if password.is_empty() {
            bail!("no password on stdin");
        }
        Ok(Password::new(password))
    }
}

/// `output`, or `output` with the container extension when it has none.
fn container_path(output: &Path) -> PathBuf {
    if output.extension().is_some() {
        return output.to_path_buf();
    }
    let mut name = output.as_os_str().to_owned();
    name.push(FILE_EXTENSION);
    PathBuf::from(name)
}
