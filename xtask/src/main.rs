//! Build automation tasks for the corpus runner
//!
//! Currently generates the CLI reference from the clap definitions, so the
//! documented flags and exit statuses cannot drift from the binary.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for the corpus runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<corpus_runner::Cli>();

    let content = format!(
        r#"# corpus-runner CLI Reference

This file is generated from the CLI source code. Last updated: {}.

## Workflow

```bash
# Build the corpus manifest once
corpus-runner generate

# Process the corpus in batches; repeat until exit status 10
corpus-runner run --max-files 500 --concurrency 8

# See how far along the corpus is
corpus-runner report
```

A run stopped with Ctrl+C or SIGTERM finishes its in-flight items,
checkpoints and exits with status 130. A run that was killed outright is
picked up by the next one: leftover result files are recovered before new
work is scheduled.

## Commands

{}

## Environment Variables

- `S3_BUCKET` - bucket holding the corpus (required)
- `S3_ENDPOINT`, `S3_REGION`, `S3_PATH_STYLE` - S3-compatible endpoint settings
- `S3_ACCESS_KEY`, `S3_SECRET_KEY` - static credentials; the AWS credential chain is used otherwise
- `CORPUS_MANIFEST_KEY`, `CORPUS_PROCESSED_KEY` - remote manifest keys
- `CORPUS_PREFIX`, `CORPUS_DESCRIPTOR_SUFFIX`, `CORPUS_EXCLUDE_PREFIXES` - what `generate` lists
- `CORPUS_OUTPUT_PREFIX`, `CORPUS_OUTPUT_DIR`, `CORPUS_RETENTION_DIR`, `CORPUS_CACHE_DIR`, `CORPUS_STATE_DIR` - result and working locations
- `CORPUS_MAX_FILES`, `CORPUS_CONCURRENCY`, `CORPUS_CHECKPOINT_EVERY`, `CORPUS_UPLOAD_EVERY` - batch settings
- `CORPUS_DOWNLOAD_RETRIES`, `CORPUS_RETRY_DELAY_MS`, `CORPUS_SKIP_SUFFIXES` - download settings
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILTER` - logging

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());
    Ok(())
}
