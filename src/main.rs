//! CLI entry point for `candycane`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use unicode_width::UnicodeWidthChar;

use candycane::config::{self, Config};
use candycane::import::worker::{spawn_import, ImportJob};
use candycane::import::ImportReport;
use candycane::model::mail::{MessageContent, MessageSummary};
use candycane::parser::eml::EmlMessage;
use candycane::parser::mime::html_to_text;
use candycane::parser::{FormatAdapter, MessageSource, Record, SourceType};
use candycane::store::{MailStore, MessageFilter, SqliteStore};

#[derive(Parser)]
#[command(
    name = "candycane",
    version,
    about = "Archive EML files and MBOX exports into a local SQLite store and browse them"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Archive database (defaults to the configured location)
    #[arg(long, global = true, value_name = "PATH", env = "CANDYCANE_DB")]
    db: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a single EML file and print the normalized message
    ParseEml {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Parse an MBOX archive and print its records
    ParseMbox {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Import every file of one type found under a folder
    Import {
        folder: PathBuf,
        /// Source format: eml or mbox
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        source_type: SourceType,
        #[arg(long)]
        json: bool,
    },
    /// List the stored categories
    Categories,
    /// List messages, newest first
    List {
        /// Category path; includes every sub-category
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        recipients: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        /// Substring of the plain-text body
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one message
    Show {
        id: String,
        /// Print the raw HTML body instead of its text rendering
        #[arg(long)]
        html: bool,
    },
    /// Write an attachment to a file
    Attachment {
        id: String,
        name: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Rebuild the synthetic chat conversation messages
    Group,
    /// Save a snapshot of the archive database
    Save { file: PathBuf },
    /// Replace the archive database with a snapshot
    Load { file: PathBuf },
    /// Show the configuration, or write the defaults with --init
    Config {
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config::database_path(&config));

    match cli.command {
        Commands::ParseEml { file, json } => cmd_parse_eml(&file, json),
        Commands::ParseMbox { file, json } => cmd_parse_mbox(&file, &config, json),
        Commands::Import {
            folder,
            source_type,
            json,
        } => cmd_import(&db_path, &folder, source_type, &config, json),
        Commands::Categories => cmd_categories(&db_path),
        Commands::List {
            category,
            sender,
            recipients,
            subject,
            content,
            json,
        } => {
            let filter = MessageFilter {
                category,
                sender,
                recipients,
                subject,
                content,
            };
            cmd_list(&db_path, &filter, json)
        }
        Commands::Show { id, html } => cmd_show(&db_path, &id, html),
        Commands::Attachment { id, name, output } => cmd_attachment(&db_path, &id, &name, &output),
        Commands::Group => cmd_group(&db_path, &config),
        Commands::Save { file } => cmd_save(&db_path, &file),
        Commands::Load { file } => cmd_load(&db_path, &file),
        Commands::Config { init } => cmd_config(&config, init),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::data_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "candycane.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open_store(db_path: &Path) -> anyhow::Result<SqliteStore> {
    Ok(SqliteStore::open(db_path)?)
}

/// Parse one EML file and print it.
fn cmd_parse_eml(path: &Path, json: bool) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let parsed = EmlMessage::from_file(path)?;
    let (message, attachments) = parsed.normalize(parsed.category());

    if json {
        let output = serde_json::json!({
            "message": message,
            "attachments": attachments.iter().map(|a| serde_json::json!({
                "name": a.attachment_id,
                "size": a.data.len(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_message_header(&message.id, &message.sender, &message.recipients, &message.subject, &message.date);
    println!("  {:<12} {}", "Category", display_category(&message.category));
    print_attachment_list(attachments.iter().map(|a| (a.attachment_id.as_str(), a.data.len())));
    println!();
    let content = MessageContent {
        rich_content: message.rich_content,
        content: message.content,
    };
    println!("{}", body_for_terminal(&content, false));
    Ok(())
}

/// Parse an MBOX archive and print every record.
fn cmd_parse_mbox(path: &Path, config: &Config, json: bool) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let adapter = SourceType::Mbox.adapter(&config.import);
    let start = Instant::now();
    let parsed = adapter.parse_file(path)?;
    let elapsed = start.elapsed();

    if json {
        let records: Vec<serde_json::Value> = parsed
            .records
            .iter()
            .map(|record| match record {
                Record::Mail {
                    message,
                    attachments,
                } => serde_json::json!({
                    "kind": "mail",
                    "message": message,
                    "attachments": attachments.iter().map(|a| &a.attachment_id).collect::<Vec<_>>(),
                }),
                Record::Conversation(conversation) => serde_json::json!({
                    "kind": "conversation",
                    "conversation": conversation,
                }),
            })
            .collect();
        let rejected: Vec<serde_json::Value> = parsed
            .rejected
            .iter()
            .map(|r| serde_json::json!({ "location": r.location, "reason": r.error.to_string() }))
            .collect();
        let output = serde_json::json!({
            "file": path.to_string_lossy(),
            "records": records,
            "rejected": rejected,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "File", path.display());
    println!(
        "  {:<20} {}",
        "File size",
        format_size(std::fs::metadata(path)?.len(), BINARY)
    );
    println!("  {:<20} {}", "Records", parsed.records.len());
    println!("  {:<20} {}", "Rejected", parsed.rejected.len());
    println!("  {:<20} {:.2?}", "Parse time", elapsed);
    println!();

    for record in &parsed.records {
        match record {
            Record::Mail {
                message,
                attachments,
            } => println!(
                "  mail  {}  {}  {}  ({} attachment(s))",
                message.date,
                fit(&message.sender, 25),
                fit(&message.subject, 40),
                attachments.len()
            ),
            Record::Conversation(c) => println!(
                "  chat  {}  thread {}  #{}  {}",
                c.date,
                c.thread_id,
                c.conversation_id,
                fit(&c.participants, 40)
            ),
        }
    }
    for rejected in &parsed.rejected {
        println!("  skip  {}: {}", rejected.location, rejected.error);
    }
    println!();
    Ok(())
}

/// Import a folder on the background worker while showing progress.
fn cmd_import(
    db_path: &Path,
    folder: &Path,
    source_type: SourceType,
    config: &Config,
    json: bool,
) -> anyhow::Result<()> {
    if !folder.is_dir() {
        anyhow::bail!("Not a folder: {}", folder.display());
    }
    let store = open_store(db_path)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} Importing {source_type} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} files ({{eta}})"
            ))
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let progress_bar = pb.clone();
    let job = ImportJob::new(folder, source_type, config.import.clone()).on_progress(
        move |done, total| {
            progress_bar.set_length(total as u64);
            progress_bar.set_position(done as u64);
        },
    );

    let handle = spawn_import(store, job)?;
    while !handle.is_finished() {
        pb.tick();
        std::thread::sleep(Duration::from_millis(100));
    }
    let (_store, result) = handle.join()?;
    pb.finish_and_clear();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_import_report(folder, &report, start.elapsed());
    }
    Ok(())
}

fn print_import_report(folder: &Path, report: &ImportReport, elapsed: std::time::Duration) {
    println!();
    println!("  {:<24} {}", "Folder", folder.display());
    println!("  {:<24} {}", "Files", report.files_seen);
    println!("  {:<24} {}", "Messages inserted", report.messages_inserted);
    println!("  {:<24} {}", "Attachments inserted", report.attachments_inserted);
    println!("  {:<24} {}", "Chat fragments inserted", report.conversations_inserted);
    println!("  {:<24} {}", "Duplicates skipped", report.duplicates_skipped);
    println!("  {:<24} {}", "Conversations grouped", report.conversation_messages);
    println!("  {:<24} {:.2?}", "Elapsed", elapsed);
    if report.cancelled {
        println!("  Import was cancelled before all files were processed.");
    }

    if !report.failures.is_empty() {
        println!();
        println!("  {} failure(s):", report.failures.len());
        for failure in &report.failures {
            println!("    {}: {}", failure.location, failure.reason);
        }
    }
    println!();
}

fn cmd_categories(db_path: &Path) -> anyhow::Result<()> {
    let store = open_store(db_path)?;
    for category in store.categories()? {
        println!("{}", display_category(&category));
    }
    Ok(())
}

fn cmd_list(db_path: &Path, filter: &MessageFilter, json: bool) -> anyhow::Result<()> {
    let store = open_store(db_path)?;
    let messages = store.messages(filter)?;

    if json {
        let output = serde_json::json!({
            "result_count": messages.len(),
            "results": messages,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_message_table(&messages);
    }
    Ok(())
}

/// Print message summaries as a human-readable table.
fn print_message_table(messages: &[MessageSummary]) {
    println!();
    println!("  {} message(s)", messages.len());
    println!();

    if messages.is_empty() {
        return;
    }

    println!(
        "  {:<19} {:<25} {:<40} {:>3}  {}",
        "Date", "From", "Subject", "Att", "Id"
    );
    println!("  {}", "-".repeat(100));

    for m in messages {
        println!(
            "  {:<19} {} {} {:>3}  {}",
            m.date,
            fit(&m.sender, 25),
            fit(&m.subject, 40),
            m.has_attachments,
            m.id
        );
    }
    println!();
}

fn cmd_show(db_path: &Path, id: &str, html: bool) -> anyhow::Result<()> {
    let store = open_store(db_path)?;
    let Some(message) = store.message(id)? else {
        anyhow::bail!("No message with id {id}");
    };

    print_message_header(&message.id, &message.sender, &message.recipients, &message.subject, &message.date);
    println!("  {:<12} {}", "Category", display_category(&message.category));

    let names = store.attachment_names(id)?;
    let mut sized = Vec::with_capacity(names.len());
    for name in &names {
        let size = store.attachment_data(id, name)?.map_or(0, |d| d.len());
        sized.push((name.as_str(), size));
    }
    print_attachment_list(sized.into_iter());

    let content = store.content(id)?.unwrap_or_default();
    println!();
    println!("{}", body_for_terminal(&content, html));
    Ok(())
}

fn cmd_attachment(db_path: &Path, id: &str, name: &str, output: &Path) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let store = open_store(db_path)?;
    let Some(data) = store.attachment_data(id, name)? else {
        anyhow::bail!("Message {id} has no attachment named '{name}'");
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &data)?;
    println!(
        "Wrote {} ({}) to {}",
        name,
        format_size(data.len(), BINARY),
        output.display()
    );
    Ok(())
}

fn cmd_group(db_path: &Path, config: &Config) -> anyhow::Result<()> {
    let mut store = open_store(db_path)?;
    let written = store.group_conversations(config.import.self_address.as_deref())?;
    println!("Grouped chat fragments into {written} conversation(s)");
    Ok(())
}

fn cmd_save(db_path: &Path, file: &Path) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let store = open_store(db_path)?;
    store.save_to_file(file)?;
    let size = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
    println!("Saved snapshot to {} ({})", file.display(), format_size(size, BINARY));
    Ok(())
}

fn cmd_load(db_path: &Path, file: &Path) -> anyhow::Result<()> {
    let mut store = open_store(db_path)?;
    store.load_from_file(file)?;
    println!(
        "Loaded snapshot {} into {}",
        file.display(),
        db_path.display()
    );
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        let path = config::save_config(&Config::default())?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    match config::config_file_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# (no config directory)"),
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "candycane", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

fn print_message_header(id: &str, sender: &str, recipients: &str, subject: &str, date: &str) {
    println!();
    println!("  {:<12} {}", "Id", id);
    println!("  {:<12} {}", "Date", date);
    println!("  {:<12} {}", "From", sender);
    println!("  {:<12} {}", "To", recipients);
    println!("  {:<12} {}", "Subject", subject);
}

fn print_attachment_list<'a>(attachments: impl Iterator<Item = (&'a str, usize)>) {
    use humansize::{format_size, BINARY};

    for (name, size) in attachments {
        println!("  {:<12} {} ({})", "Attachment", name, format_size(size, BINARY));
    }
}

fn display_category(category: &str) -> &str {
    if category.is_empty() {
        "/"
    } else {
        category
    }
}

/// Body to print: plain text when present, otherwise the HTML rendered as text.
fn body_for_terminal(body: &MessageContent, raw_html: bool) -> String {
    if raw_html {
        return body.preferred().to_string();
    }
    if !body.content.trim().is_empty() {
        return body.content.clone();
    }
    html_to_text(&body.rich_content)
}

/// Truncate to a display width and pad to exactly that width.
fn fit(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(width);
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push_str(&" ".repeat(width - used));
    out
}
