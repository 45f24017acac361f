use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use image_renamer_core::{
    app_paths, collect_image_files, load_config, owner_queue, save_config, validate_template,
    AppendStats, CollectStats, ExifMetadataReader, MetadataNormalizer, PassOutcome,
    RenameOrchestrator, RenameScheduler, RunReport, RunState,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "image-renamer-cli")]
#[command(about = "画像ファイルをメタデータのテンプレートで一括リネームします")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Rename(RenameArgs),
    Inspect { file: PathBuf },
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    SetTemplate { template: String },
}

#[derive(Debug, Args)]
struct RenameArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long)]
    template: Option<String>,
    #[arg(long, default_value_t = false)]
    recursive: bool,
    #[arg(long, default_value_t = false)]
    include_hidden: bool,
    #[arg(long, default_value_t = false)]
    apply: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Serialize)]
struct Preview {
    template: String,
    collect: CollectStats,
    append: AppendStats,
    entries: Vec<PreviewEntry>,
}

#[derive(Debug, Serialize)]
struct PreviewEntry {
    path: PathBuf,
    new_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_renamer_core=info,image_renamer_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rename(args) => cmd_rename(args).await,
        Commands::Inspect { file } => cmd_inspect(file),
        Commands::Config(config) => match config.action {
            ConfigAction::Show => cmd_config_show(),
            ConfigAction::SetTemplate { template } => cmd_config_set_template(template),
        },
    }
}

async fn cmd_rename(args: RenameArgs) -> Result<()> {
    let config = load_config()?;
    let template = args.template.unwrap_or(config.template);
    validate_template(&template).context("テンプレートが不正です")?;

    let (files, collect) = collect_image_files(
        &args.inputs,
        args.recursive || config.recursive_default,
        args.include_hidden || config.include_hidden_default,
    )?;

    // This task is the owner of the working set; notifications and removals
    // are queued here and drained while a run is in flight.
    let (dispatcher, mut queue) = owner_queue();
    let scheduler = RenameScheduler::builder()
        .dispatcher(Arc::new(dispatcher))
        .build(Handle::current());
    scheduler.set_template(template.clone());
    let append = scheduler.append_files(&files);
    if let PassOutcome::TemplateInvalid(err) = scheduler.wait_idle().await {
        anyhow::bail!("テンプレートが不正です: {err}");
    }
    queue.run_pending();

    let preview = Preview {
        template,
        collect,
        append,
        entries: scheduler
            .records()
            .iter()
            .map(|record| PreviewEntry {
                path: record.path().to_path_buf(),
                new_name: record.new_name().to_string(),
            })
            .collect(),
    };

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        OutputFormat::Table => {
            print_table(&preview);
        }
    }

    if !args.apply {
        eprintln!("dry-runモード: 実ファイルは変更していません。適用するには --apply を指定してください。");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("中断を受け付けました。処理中のファイルの完了後に停止します");
                cancel.cancel();
            }
        }
    });

    let orchestrator = RenameOrchestrator::new(scheduler.clone());
    let mut run = std::pin::pin!(orchestrator.run(
        |done, total| eprint!("\r処理中: {done}/{total}"),
        cancel,
    ));
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = queue.run_next() => {}
        }
    };
    queue.run_pending();
    eprintln!();

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(err) => {
            let target = err
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            eprintln!(
                "リネームを中断しました: 未処理 {}件 {}",
                scheduler.len(),
                target
            );
            Err(err.into())
        }
    }
}

fn cmd_inspect(file: PathBuf) -> Result<()> {
    let record = MetadataNormalizer::new(Arc::new(ExifMetadataReader))
        .normalize(&file)
        .with_context(|| format!("メタデータを読めませんでした: {}", file.display()))?;

    println!("{}", record.path().display());
    for entry in record.metadata() {
        println!(
            "{:<48} {:<40} {}",
            entry.template_snippet(),
            entry.value,
            entry.qualified_name()
        );
    }
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let paths = app_paths()?;
    println!("設定ファイル: {}", paths.config_path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_config_set_template(template: String) -> Result<()> {
    validate_template(&template).context("テンプレートが不正です")?;
    let mut config = load_config()?;
    config.template = template;
    save_config(&config)?;
    info!(template = %config.template, "テンプレートを保存しました");
    Ok(())
}

fn print_table(preview: &Preview) {
    println!("元ファイル -> 新ファイル名");
    for entry in &preview.entries {
        let new_name = if entry.new_name.is_empty() {
            "(未確定)"
        } else {
            entry.new_name.as_str()
        };
        println!("{} -> {}", entry.path.display(), new_name);
    }

    println!(
        "\n集計: scanned={} accepted={} hidden_skip={} unsupported_skip={} loaded={} unreadable={} duplicates={}",
        preview.collect.scanned_files,
        preview.collect.accepted,
        preview.collect.skipped_hidden,
        preview.collect.skipped_unsupported,
        preview.append.added,
        preview.append.unreadable,
        preview.append.duplicates,
    );
}

fn print_report(report: &RunReport) {
    for renamed in &report.renamed {
        println!("{} -> {}", renamed.from.display(), renamed.to.display());
    }
    let state = match report.state {
        RunState::Completed => "完了",
        RunState::Canceled => "中断",
    };
    eprintln!(
        "適用{}: {}件 (未処理 {}件)",
        state,
        report.renamed.len(),
        report.remaining
    );
}
