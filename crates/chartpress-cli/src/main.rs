use chartpress::{
    ChartError, ChartJob, ChartPipeline, DEFAULT_DATAWRAPPER_API_URL,
    DEFAULT_DATAWRAPPER_CHART_TYPE, DEFAULT_DATAWRAPPER_PUBLIC_URL, DatawrapperChart,
    DatawrapperClient, FieldValue, LoadReport, MalformedRowPolicy, PipelineConfig, PipelineEvent,
    PipelineEventKind, PipelineEventSink, PipelineReport, RenderOptions, ReqwestDatawrapperHttp,
    VisualMapping, coerce_numeric_fields, load_csv, pipeline_event_channel, preset, presets,
};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chartpress-cli")]
#[command(about = "Render CSV data to standalone SVG charts in a headless browser")]
struct Cli {
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Render(RenderArgs),
    Inspect(InspectArgs),
    Presets(PresetsArgs),
    /// Upload a CSV file to Datawrapper and publish it; reads DATAWRAPPER_API_TOKEN.
    Publish(PublishArgs),
}

#[derive(clap::Args, Debug)]
struct RenderArgs {
    /// JSON job file; flags below override its fields.
    #[arg(long)]
    job: Option<PathBuf>,
    /// Chart kind; a built-in preset of the same name supplies defaults.
    #[arg(long)]
    chart: Option<String>,
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
    /// Channel assignment, `channel=field[,field...]`. Repeatable.
    #[arg(long = "map")]
    mappings: Vec<String>,
    /// Field to coerce to a number. Repeatable.
    #[arg(long = "numeric")]
    numeric_fields: Vec<String>,
    #[arg(long)]
    width: Option<f64>,
    #[arg(long)]
    height: Option<f64>,
    #[arg(long)]
    options_json: Option<String>,
    #[arg(long)]
    mapping_json: Option<String>,
    #[command(flatten)]
    loader: LoaderArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    headed: bool,
    /// Chrome/Chromium executable; auto-detected when omitted.
    #[arg(long)]
    chrome: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    no_sandbox: bool,
    #[arg(long)]
    core_url: Option<String>,
    #[arg(long)]
    catalog_url: Option<String>,
    #[arg(long)]
    script_timeout_ms: Option<u64>,
    #[arg(long)]
    launch_timeout_ms: Option<u64>,
    /// CDP request timeout; always kept above the script timeout.
    #[arg(long)]
    request_timeout_ms: Option<u64>,
    #[arg(long, action = ArgAction::SetTrue)]
    event_json: bool,
}

#[derive(clap::Args, Debug)]
struct LoaderArgs {
    #[arg(long, default_value_t = ',')]
    delimiter: char,
    /// Fail on rows whose field count differs from the header instead of skipping them.
    #[arg(long, action = ArgAction::SetTrue)]
    strict_rows: bool,
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    #[arg(long)]
    input: PathBuf,
    /// Use the numeric fields of this preset.
    #[arg(long)]
    chart: Option<String>,
    #[arg(long = "numeric")]
    numeric_fields: Vec<String>,
    #[command(flatten)]
    loader: LoaderArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct PublishArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = DEFAULT_DATAWRAPPER_CHART_TYPE)]
    chart_type: String,
    /// Extra chart properties as a JSON object, e.g. `{"theme":"datawrapper"}`.
    #[arg(long)]
    properties_json: Option<String>,
    #[arg(long, default_value = DEFAULT_DATAWRAPPER_API_URL)]
    api_url: String,
    #[arg(long, default_value = DEFAULT_DATAWRAPPER_PUBLIC_URL)]
    public_url: String,
    #[command(flatten)]
    loader: LoaderArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct PresetsArgs {
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let result = match cli.command {
        Commands::Render(args) => render_command(args).await,
        Commands::Inspect(args) => inspect_command(args),
        Commands::Presets(args) => presets_command(args),
        Commands::Publish(args) => publish_command(args).await,
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(error) = installed {
        eprintln!("failed to install log subscriber: {error}");
    }
}

async fn render_command(args: RenderArgs) -> Result<ExitCode, ChartError> {
    let job = build_job(&args)?;
    let config = build_config(&args)?;

    let (event_sink, event_task) = event_stream(args.event_json);
    let pipeline = ChartPipeline::chrome(config).with_events(event_sink);
    let outcome = pipeline.run(&job).await;
    drop(pipeline);

    if let Some(task) = event_task {
        if let Err(error) = task.await {
            tracing::warn!(error = %error, "event stream task failed");
        }
    }

    let report = outcome?;
    print_render_summary(&report);
    Ok(ExitCode::SUCCESS)
}

fn build_job(args: &RenderArgs) -> Result<ChartJob, ChartError> {
    let mut job = match args.job.as_deref() {
        Some(path) => ChartJob::load_from_path(path)?,
        None => {
            let chart_kind = required(args.chart.as_deref(), "--chart")?;
            let input = required(args.input.clone(), "--input")?;
            let output = required(args.output.clone(), "--output")?;
            match preset(chart_kind) {
                Some(preset) => preset.into_job(input, output),
                None => ChartJob {
                    input,
                    output,
                    chart_kind: chart_kind.to_string(),
                    mapping: VisualMapping::new(),
                    options: RenderOptions::default(),
                    numeric_fields: Vec::new(),
                },
            }
        }
    };

    if args.job.is_some() {
        if let Some(chart_kind) = args.chart.as_ref() {
            job.chart_kind = chart_kind.clone();
        }
        if let Some(input) = args.input.as_ref() {
            job.input = input.clone();
        }
        if let Some(output) = args.output.as_ref() {
            job.output = output.clone();
        }
    }

    if let Some(raw) = args.mapping_json.as_deref() {
        let Value::Object(channels) = parse_json_flag("--mapping-json", raw)? else {
            return Err(ChartError::InvalidConfiguration(
                "--mapping-json must be a JSON object".to_string(),
            ));
        };
        for (channel, spec) in channels {
            job.mapping.insert_raw(channel, spec);
        }
    }
    for assignment in &args.mappings {
        job.mapping.apply_assignment(assignment)?;
    }
    for field in &args.numeric_fields {
        if !job.numeric_fields.contains(field) {
            job.numeric_fields.push(field.clone());
        }
    }
    if let Some(raw) = args.options_json.as_deref() {
        job.options
            .merge_json(&parse_json_flag("--options-json", raw)?)?;
    }
    if let Some(width) = args.width {
        job.options.width = Some(width);
    }
    if let Some(height) = args.height {
        job.options.height = Some(height);
    }

    job.validate()?;
    Ok(job)
}

fn build_config(args: &RenderArgs) -> Result<PipelineConfig, ChartError> {
    let mut config = PipelineConfig::default();
    config.sandbox.headed = args.headed;
    config.sandbox.no_sandbox = args.no_sandbox;
    config.sandbox.chrome_executable = args.chrome.clone();
    if let Some(timeout_ms) = args.launch_timeout_ms {
        config.sandbox.launch_timeout_ms = timeout_ms;
    }
    if let Some(timeout_ms) = args.request_timeout_ms {
        config.sandbox.request_timeout_ms = timeout_ms;
    }
    if let Some(url) = args.core_url.as_ref() {
        config.scripts.core_url = url.clone();
    }
    if let Some(url) = args.catalog_url.as_ref() {
        config.scripts.catalog_url = url.clone();
    }
    if let Some(timeout_ms) = args.script_timeout_ms {
        config.scripts.load_timeout_ms = timeout_ms;
    }
    apply_loader_args(&mut config, &args.loader)?;
    Ok(config)
}

fn apply_loader_args(config: &mut PipelineConfig, args: &LoaderArgs) -> Result<(), ChartError> {
    config.loader.delimiter = loader_delimiter(args.delimiter)?;
    if args.strict_rows {
        config.loader.malformed_rows = MalformedRowPolicy::Fail;
    }
    Ok(())
}

/// The loader splits UTF-8 input on a single byte, so only ASCII qualifies.
fn loader_delimiter(delimiter: char) -> Result<u8, ChartError> {
    if !delimiter.is_ascii() {
        return Err(ChartError::InvalidConfiguration(format!(
            "delimiter '{delimiter}' must be an ASCII character"
        )));
    }
    Ok(delimiter as u8)
}

fn required<T>(value: Option<T>, flag: &str) -> Result<T, ChartError> {
    value.ok_or_else(|| {
        ChartError::InvalidConfiguration(format!("{flag} is required when --job is not given"))
    })
}

fn parse_json_flag(flag: &str, raw: &str) -> Result<Value, ChartError> {
    serde_json::from_str(raw).map_err(|error| {
        ChartError::InvalidConfiguration(format!("{flag} is not valid JSON: {error}"))
    })
}

fn event_stream(event_json: bool) -> (PipelineEventSink, Option<tokio::task::JoinHandle<()>>) {
    if !event_json {
        return (PipelineEventSink::default(), None);
    }

    let (tx, mut rx) = pipeline_event_channel();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(_) => print_event_text(&event),
            }
        }
    });
    (PipelineEventSink::with_sender(tx), Some(task))
}

fn print_event_text(event: &PipelineEvent) {
    let label = match &event.kind {
        PipelineEventKind::StageStarted { stage } => format!("{} started", stage.as_str()),
        PipelineEventKind::StageCompleted { stage } => format!("{} completed", stage.as_str()),
        PipelineEventKind::StageFailed { stage, .. } => format!("{} failed", stage.as_str()),
        PipelineEventKind::PipelineCompleted { .. } => "pipeline completed".to_string(),
        PipelineEventKind::PipelineFailed { .. } => "pipeline failed".to_string(),
    };
    println!(
        "[event seq={}] {} {label}",
        event.sequence_no, event.timestamp
    );
}

fn print_render_summary(report: &PipelineReport) {
    println!("output: {}", report.output.display());
    println!("chart_kind: {}", report.chart_kind);
    println!("records: {}", report.records);
    println!("skipped_rows: {}", report.skipped_rows.len());
    println!("bytes: {}", report.bytes_written);
}

fn inspect_command(args: InspectArgs) -> Result<ExitCode, ChartError> {
    let mut config = PipelineConfig::default();
    apply_loader_args(&mut config, &args.loader)?;

    let mut numeric_fields = match args.chart.as_deref() {
        Some(chart_kind) => preset(chart_kind)
            .map(|preset| preset.numeric_fields)
            .ok_or_else(|| {
                ChartError::InvalidConfiguration(format!("no preset named '{chart_kind}'"))
            })?,
        None => Vec::new(),
    };
    for field in args.numeric_fields {
        if !numeric_fields.contains(&field) {
            numeric_fields.push(field);
        }
    }

    let LoadReport {
        mut dataset,
        skipped,
    } = load_csv(&args.input, &config.loader)?;
    let coercion = coerce_numeric_fields(&mut dataset, &numeric_fields);

    if args.json {
        let json = serde_json::to_string_pretty(&dataset.records).map_err(|error| {
            ChartError::InvalidConfiguration(format!("records are not serializable: {error}"))
        })?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    println!("input: {}", args.input.display());
    println!("columns: {}", dataset.columns.join(", "));
    println!("records: {}", dataset.len());
    println!("skipped_rows: {}", skipped.len());
    for row in &skipped {
        println!("  line {}: {}", row.line, row.reason);
    }
    if !numeric_fields.is_empty() {
        println!(
            "coerced: {} converted, {} defaulted to 0",
            coercion.converted, coercion.defaulted
        );
    }
    for field in &coercion.missing_fields {
        println!("missing_numeric_field: {field}");
    }
    for (index, record) in dataset.records.iter().enumerate() {
        let fields = dataset
            .columns
            .iter()
            .filter_map(|column| record.get(column).map(|value| (column, value)))
            .map(|(column, value)| format!("{column}={}", display_value(value)))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}: {fields}", index + 1);
    }
    Ok(ExitCode::SUCCESS)
}

fn display_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(number) => number.to_string(),
        FieldValue::Text(text) => text.clone(),
    }
}

async fn publish_command(args: PublishArgs) -> Result<ExitCode, ChartError> {
    let mut config = PipelineConfig::default();
    apply_loader_args(&mut config, &args.loader)?;

    let mut chart = DatawrapperChart::new(args.title, args.chart_type);
    if let Some(raw) = args.properties_json.as_deref() {
        let Value::Object(properties) = parse_json_flag("--properties-json", raw)? else {
            return Err(ChartError::InvalidConfiguration(
                "--properties-json must be a JSON object".to_string(),
            ));
        };
        chart.properties = properties;
    }
    let http = ReqwestDatawrapperHttp::from_env(args.api_url)?;

    let LoadReport { dataset, skipped } = load_csv(&args.input, &config.loader)?;
    if !skipped.is_empty() {
        tracing::warn!(skipped = skipped.len(), "malformed rows left out of the upload");
    }
    let csv = dataset.to_csv()?;
    let published = DatawrapperClient::new(http)
        .with_public_url(args.public_url)
        .publish_csv(&chart, &csv)
        .await?;

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "id": published.id,
                "public_url": published.public_url,
                "records": dataset.len(),
            })
        );
    } else {
        println!("chart_id: {}", published.id);
        println!("records: {}", dataset.len());
        println!("public_url: {}", published.public_url);
    }
    Ok(ExitCode::SUCCESS)
}

fn presets_command(args: PresetsArgs) -> Result<ExitCode, ChartError> {
    let presets = presets();
    if args.json {
        let listing: Vec<Value> = presets
            .iter()
            .map(|preset| {
                serde_json::json!({
                    "chart_kind": preset.chart_kind,
                    "description": preset.description,
                    "mapping": preset.mapping,
                    "numeric_fields": preset.numeric_fields,
                    "options": preset.options,
                })
            })
            .collect();
        let json = serde_json::to_string_pretty(&listing).map_err(|error| {
            ChartError::InvalidConfiguration(format!("presets are not serializable: {error}"))
        })?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    for preset in &presets {
        println!("{}: {}", preset.chart_kind, preset.description);
        println!("  mapping: {}", serde_json::json!(preset.mapping));
        println!("  numeric_fields: {}", preset.numeric_fields.join(", "));
        println!("  options: {}", serde_json::json!(preset.options));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_delimiter_ascii_expected_byte() {
        assert_eq!(loader_delimiter(';').expect("ascii delimiter"), b';');
        assert_eq!(loader_delimiter('\t').expect("tab delimiter"), b'\t');
    }

    #[test]
    fn loader_delimiter_latin1_expected_invalid_configuration() {
        let error =
            loader_delimiter('\u{e9}').expect_err("non-ascii delimiter should be rejected");
        assert!(matches!(error, ChartError::InvalidConfiguration(_)));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn render_request_timeout_flag_expected_in_sandbox_config() {
        let cli = Cli::try_parse_from([
            "chartpress-cli",
            "render",
            "--chart",
            "bubblechart",
            "--input",
            "people.csv",
            "--output",
            "chart.svg",
            "--request-timeout-ms",
            "120000",
        ])
        .expect("render flags should parse");
        let Commands::Render(args) = cli.command else {
            panic!("expected render command");
        };

        let config = build_config(&args).expect("config should build");
        assert_eq!(config.sandbox.request_timeout_ms, 120_000);
    }
}
