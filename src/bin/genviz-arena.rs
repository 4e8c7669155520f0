//! CLI for GenViz Arena - one prompt, many image providers, blind ranking.

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use genviz_arena::image::{
    AspectRatio, GenerationOptions, ImageFormat, ImageProvider, ImageProviderKind, RawImage,
};
use genviz_arena::{
    Batch, BatchRequest, CredentialSet, DispatchConfig, DispatchCoordinator, GenerationResult,
    RankingSession, ResultSink,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Smallest per-task timeout the CLI accepts, in seconds.
const MIN_TIMEOUT_SECS: u64 = 10;
/// Longest sanitized prompt prefix used in file names.
const MAX_FILE_STEM: usize = 50;
/// Ceiling for downloading one generated image.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "genviz-arena")]
#[command(about = "Generate images from several AI providers at once and rank them blind")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate images for one prompt across providers
    Generate(GenerateArgs),

    /// List available providers
    Providers(ProvidersArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt describing the image
    prompt: String,

    /// Provider to run, as NAME or NAME:COUNT (repeatable; default: every provider with a key)
    #[arg(short, long = "provider", value_name = "NAME[:COUNT]")]
    providers: Vec<String>,

    /// Extra Replicate model to register, as owner/name or owner/name:version (repeatable)
    #[arg(long = "replicate-model", value_name = "REF")]
    replicate_models: Vec<String>,

    /// Per-image timeout in seconds (minimum 10)
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum number of generations running at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Hide provider names and rank the results afterwards
    #[arg(long)]
    arena: bool,

    /// Directory generated images are saved under
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Do not save images to disk
    #[arg(long)]
    no_save: bool,

    /// TOML config file with [dispatch] and [credentials] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Image height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Seed for deterministic generation
    #[arg(long)]
    seed: Option<u64>,

    /// Aspect ratio (alternative to width/height)
    #[arg(long, value_enum)]
    aspect_ratio: Option<AspectRatioArg>,

    /// Rewrite the prompt with a language model on Replicate before generating
    #[arg(long)]
    enhance: bool,
}

#[derive(Args)]
struct ProvidersArgs {
    /// Extra Replicate model to list, as owner/name (repeatable)
    #[arg(long = "replicate-model", value_name = "REF")]
    replicate_models: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AspectRatioArg {
    #[value(name = "1:1")]
    Square,
    #[value(name = "16:9")]
    Landscape,
    #[value(name = "9:16")]
    Portrait,
    #[value(name = "4:3")]
    Standard,
    #[value(name = "3:4")]
    StandardPortrait,
}

impl From<AspectRatioArg> for AspectRatio {
    fn from(arg: AspectRatioArg) -> Self {
        match arg {
            AspectRatioArg::Square => AspectRatio::Square,
            AspectRatioArg::Landscape => AspectRatio::Landscape,
            AspectRatioArg::Portrait => AspectRatio::Portrait,
            AspectRatioArg::Standard => AspectRatio::Standard,
            AspectRatioArg::StandardPortrait => AspectRatio::StandardPortrait,
        }
    }
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    dispatch: DispatchConfig,
    /// Provider name -> API key.
    credentials: HashMap<String, String>,
    output_dir: Option<PathBuf>,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// A provider plus the environment variable its key is read from.
struct Registered {
    provider: Arc<dyn ImageProvider>,
    env_var: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Generate(args) => generate(args, cli.json).await?,
        Commands::Providers(args) => list_providers(&args, cli.json)?,
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "genviz_arena=debug,warn",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Built-in providers, in display order.
fn registry(replicate_models: &[String]) -> Vec<Registered> {
    #[allow(unused_mut)]
    let mut providers: Vec<Registered> = Vec::new();

    #[cfg(feature = "openai-image")]
    providers.push(Registered {
        provider: Arc::new(genviz_arena::OpenAiImageProvider::builder().build()),
        env_var: ImageProviderKind::OpenAI.api_key_env(),
    });
    #[cfg(feature = "google-image")]
    providers.push(Registered {
        provider: Arc::new(genviz_arena::GoogleImageProvider::builder().build()),
        env_var: ImageProviderKind::Google.api_key_env(),
    });
    #[cfg(feature = "recraft-image")]
    providers.push(Registered {
        provider: Arc::new(genviz_arena::RecraftProvider::builder().build()),
        env_var: ImageProviderKind::Recraft.api_key_env(),
    });
    #[cfg(feature = "ideogram-image")]
    providers.push(Registered {
        provider: Arc::new(genviz_arena::IdeogramProvider::builder().build()),
        env_var: ImageProviderKind::Ideogram.api_key_env(),
    });
    #[cfg(feature = "replicate-image")]
    {
        use genviz_arena::{ReplicateModel, ReplicateProvider};
        let hosted = [
            ReplicateModel::FluxSchnell,
            ReplicateModel::RecraftV3,
            ReplicateModel::Imagen3,
            ReplicateModel::IdeogramV2aTurbo,
        ];
        let custom = replicate_models.iter().map(|r| ReplicateModel::parse(r));
        for model in hosted.into_iter().chain(custom) {
            providers.push(Registered {
                provider: Arc::new(ReplicateProvider::builder().model(model).build()),
                env_var: ImageProviderKind::Replicate.api_key_env(),
            });
        }
    }
    #[cfg(not(feature = "replicate-image"))]
    if !replicate_models.is_empty() {
        tracing::warn!("replicate-image feature disabled; ignoring --replicate-model");
    }

    providers
}

/// File credentials first, environment variables override them.
fn resolve_credentials(registry: &[Registered], file: &HashMap<String, String>) -> CredentialSet {
    let mut credentials = CredentialSet::new();
    for (name, key) in file {
        credentials.insert(name.clone(), key.clone());
    }
    for entry in registry {
        if let Ok(key) = std::env::var(entry.env_var) {
            credentials.insert(entry.provider.name(), key);
        }
    }
    // The prompt enhancer is not a registered provider but shares the Replicate token.
    let replicate = ImageProviderKind::Replicate;
    if let Ok(key) = std::env::var(replicate.api_key_env()) {
        credentials.insert(replicate.as_str(), key);
    }
    credentials
}

/// Rewrites the prompt with the Replicate-hosted enhancer, keeping the
/// original prompt when that fails.
#[cfg(feature = "replicate-image")]
async fn enhance_prompt(prompt: &str, credentials: &CredentialSet) -> String {
    use genviz_arena::{PromptEnhancer, ReplicatePromptEnhancer};

    let enhancer = ReplicatePromptEnhancer::builder().build();
    let credential = credentials.get(ImageProviderKind::Replicate.as_str());
    match enhancer.enhance(prompt, credential).await {
        Ok(enhanced) => {
            eprintln!("Enhanced prompt: {enhanced}");
            enhanced
        }
        Err(e) => {
            tracing::warn!("prompt enhancement failed: {e}");
            eprintln!("Could not enhance the prompt, using the original ({e})");
            prompt.to_string()
        }
    }
}

#[cfg(not(feature = "replicate-image"))]
async fn enhance_prompt(prompt: &str, _credentials: &CredentialSet) -> String {
    eprintln!("Prompt enhancement needs the replicate-image feature, using the original prompt");
    prompt.to_string()
}

/// Parses `NAME` or `NAME:COUNT`, clamping the count to `1..=max_repeat`.
fn parse_selection(value: &str, max_repeat: u32) -> anyhow::Result<(String, u32)> {
    let (name, count) = match value.rsplit_once(':') {
        Some((name, count)) if count.chars().all(|c| c.is_ascii_digit()) && !count.is_empty() => {
            let count: u32 = count
                .parse()
                .with_context(|| format!("invalid count in {value:?}"))?;
            (name, count)
        }
        _ => (value, 1),
    };
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("empty provider name in {value:?}");
    }
    Ok((name.to_string(), count.clamp(1, max_repeat.max(1))))
}

async fn generate(args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let file = FileConfig::load(args.config.as_deref())?;

    let mut config = file.dispatch.clone();
    if let Some(secs) = args.timeout {
        config.task_timeout = Duration::from_secs(secs.max(MIN_TIMEOUT_SECS));
    }
    if let Some(width) = args.concurrency {
        config.max_concurrency = width;
    }

    let registry = registry(&args.replicate_models);
    let credentials = resolve_credentials(&registry, &file.credentials);

    let output_dir = args
        .output_dir
        .clone()
        .or(file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("generated_images"));
    let sink = if args.no_save {
        None
    } else {
        Some(Arc::new(DiskSink::new(output_dir, &registry)?))
    };

    let mut builder = DispatchCoordinator::builder().config(config.clone());
    for entry in &registry {
        builder = builder.shared_provider(Arc::clone(&entry.provider));
    }
    if let Some(sink) = &sink {
        builder = builder.result_sink(sink.clone());
    }
    let coordinator = builder.build()?;

    let selections = if args.providers.is_empty() {
        let available: Vec<_> = coordinator
            .provider_names()
            .filter(|name| credentials.contains(name))
            .map(|name| (name.to_string(), 1))
            .collect();
        if available.is_empty() {
            anyhow::bail!("no provider has an API key configured; see `genviz-arena providers`");
        }
        available
    } else {
        args.providers
            .iter()
            .map(|value| parse_selection(value, config.max_repeat))
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let options = GenerationOptions {
        width: args.width,
        height: args.height,
        seed: args.seed,
        aspect_ratio: args.aspect_ratio.map(Into::into),
    };
    let prompt = if args.enhance {
        enhance_prompt(&args.prompt, &credentials).await
    } else {
        args.prompt.clone()
    };
    let mut request = BatchRequest::new(prompt)
        .with_options(options)
        .arena(args.arena);
    for (name, count) in selections {
        request = request.select(name, count);
    }

    let batch = coordinator.submit_batch(request, &credentials)?;
    if !json_output {
        tokio::spawn(report_progress(batch.clone()));
    }

    tokio::select! {
        _ = batch.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            let canceled = batch.cancel_all();
            eprintln!("Canceled {canceled} generation(s)");
            batch.wait().await;
        }
    }
    batch.flush_sink().await;

    let saved = sink.map(|sink| sink.saved()).unwrap_or_default();
    let results = batch.current_view();

    if json_output {
        print_json(&batch, &results, &saved)?;
        return Ok(());
    }

    print_results(&batch, &coordinator, &results, &saved);

    if batch.is_arena() && std::io::stdin().is_terminal() {
        let mut session = RankingSession::open(&batch)?;
        if session.is_empty() {
            println!("Nothing to rank.");
            return Ok(());
        }
        let ranking = tokio::task::block_in_place(|| {
            rank_interactively(&mut session, std::io::stdin().lock(), std::io::stdout())
        })?;
        match ranking {
            Some(order) => reveal(&coordinator, &results, &order),
            None => session.discard(),
        }
    }

    Ok(())
}

async fn report_progress(batch: Batch) {
    let mut rx = batch.subscribe();
    loop {
        let status = *rx.borrow_and_update();
        eprintln!(
            "[{}/{}] running {}, queued {}, failed {}, canceled {}",
            status.completed + status.failed + status.canceled,
            status.total,
            status.running,
            status.queued,
            status.failed,
            status.canceled,
        );
        if status.is_complete() || rx.changed().await.is_err() {
            break;
        }
    }
}

fn display_name<'a>(coordinator: &'a DispatchCoordinator, provider: &'a str) -> &'a str {
    coordinator
        .provider(provider)
        .map(|p| p.display_name())
        .unwrap_or(provider)
}

fn print_results(
    batch: &Batch,
    coordinator: &DispatchCoordinator,
    results: &[GenerationResult],
    saved: &HashMap<String, PathBuf>,
) {
    println!("\nPrompt: {}", batch.prompt());
    for result in results {
        let who = if batch.is_arena() {
            result.slot_label.clone()
        } else {
            format!("{} [{}]", result.slot_label, display_name(coordinator, &result.provider))
        };
        match (&result.outcome, saved.get(&result.slot_label)) {
            (Ok(_), Some(path)) => println!("  ✓ {who}: {}", path.display()),
            (Ok(RawImage::Url(url)), None) => println!("  ✓ {who}: {url}"),
            (Ok(RawImage::Bytes(data)), None) => println!("  ✓ {who}: {} bytes", data.len()),
            (Err(message), _) => println!("  ✗ {who}: {message}"),
        }
    }

    let status = batch.status();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    println!(
        "\n{} succeeded, {} failed, {} timed out, {} canceled",
        succeeded,
        (results.len() - succeeded).saturating_sub(status.failed),
        status.failed,
        status.canceled,
    );
}

fn print_json(
    batch: &Batch,
    results: &[GenerationResult],
    saved: &HashMap<String, PathBuf>,
) -> anyhow::Result<()> {
    let items: Vec<_> = results
        .iter()
        .map(|result| {
            let mut item = serde_json::json!({
                "slot": result.slot_label,
                "provider": result.provider,
                "task_id": result.task_id,
                "success": result.is_ok(),
            });
            match &result.outcome {
                Ok(RawImage::Url(url)) => item["url"] = url.clone().into(),
                Ok(RawImage::Bytes(data)) => item["size_bytes"] = data.len().into(),
                Err(message) => item["error"] = message.clone().into(),
            }
            if let Some(path) = saved.get(&result.slot_label) {
                item["output"] = path.display().to_string().into();
            }
            item
        })
        .collect();

    let summary = serde_json::json!({
        "prompt": batch.prompt(),
        "arena": batch.is_arena(),
        "status": batch.status(),
        "results": items,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Reads ranking commands until the user submits or quits.
///
/// Commands: `up N`, `down N` (N is the current 1-based rank), `show`,
/// `submit` and `quit`. Returns the submitted order, or `None` on quit or
/// end of input.
fn rank_interactively<R: BufRead, W: Write>(
    session: &mut RankingSession,
    input: R,
    mut output: W,
) -> anyhow::Result<Option<Vec<String>>> {
    writeln!(output, "\nRank the images (up N, down N, show, submit, quit):")?;
    print_order(session, &mut output)?;

    for line in input.lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let rank = words.next().and_then(|n| n.parse::<usize>().ok());

        let slot = rank
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| session.order().get(i).cloned());
        match (command.as_str(), slot) {
            ("up" | "u", Some(slot)) => session.move_up(&slot)?,
            ("down" | "d", Some(slot)) => session.move_down(&slot)?,
            ("up" | "u" | "down" | "d", None) => {
                writeln!(output, "Expected a rank between 1 and {}", session.len())?;
                continue;
            }
            ("show" | "", _) => {}
            ("submit" | "s", _) => {
                let order = session.submit()?;
                writeln!(output, "\nFinal ranking:")?;
                for (i, slot) in order.iter().enumerate() {
                    writeln!(output, "{}. {}", i + 1, slot)?;
                }
                return Ok(Some(order));
            }
            ("quit" | "q", _) => return Ok(None),
            (other, _) => {
                writeln!(output, "Unknown command: {other}")?;
                continue;
            }
        }
        print_order(session, &mut output)?;
    }

    Ok(None)
}

fn print_order<W: Write>(session: &RankingSession, output: &mut W) -> std::io::Result<()> {
    for entry in session.entries() {
        writeln!(output, "  {}. {}", entry.position + 1, entry.slot_label)?;
    }
    Ok(())
}

fn reveal(coordinator: &DispatchCoordinator, results: &[GenerationResult], order: &[String]) {
    let providers: HashMap<_, _> = results
        .iter()
        .map(|r| (r.slot_label.as_str(), r.provider.as_str()))
        .collect();
    println!("\nRevealed:");
    for (i, slot) in order.iter().enumerate() {
        let provider = providers.get(slot.as_str()).copied().unwrap_or("?");
        println!("{}. {} = {}", i + 1, slot, display_name(coordinator, provider));
    }
}

fn list_providers(args: &ProvidersArgs, json_output: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct ProviderInfo<'a> {
        name: &'a str,
        display_name: &'a str,
        env_var: &'static str,
        configured: bool,
    }

    let registry = registry(&args.replicate_models);
    let providers: Vec<_> = registry
        .iter()
        .map(|entry| ProviderInfo {
            name: entry.provider.name(),
            display_name: entry.provider.display_name(),
            env_var: entry.env_var,
            configured: std::env::var(entry.env_var).is_ok_and(|v| !v.trim().is_empty()),
        })
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&providers)?);
    } else {
        println!("Available providers:\n");
        for p in &providers {
            let status = if p.configured { "✓" } else { "✗" };
            println!("  {} {} ({})", status, p.display_name, p.name);
            println!("    API key: {}", p.env_var);
        }
    }

    Ok(())
}

/// Saves every successful result under `<root>/<Provider_Name>/`.
struct DiskSink {
    root: PathBuf,
    client: reqwest::Client,
    folders: HashMap<String, String>,
    saved: Mutex<HashMap<String, PathBuf>>,
}

impl DiskSink {
    fn new(root: PathBuf, registry: &[Registered]) -> anyhow::Result<Self> {
        let folders = registry
            .iter()
            .map(|entry| {
                let name = entry.provider.name().to_string();
                let folder = entry.provider.display_name().replace(' ', "_");
                (name, folder)
            })
            .collect();
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("failed to build download client")?;
        Ok(Self {
            root,
            client,
            folders,
            saved: Mutex::new(HashMap::new()),
        })
    }

    /// Slot label -> saved file.
    fn saved(&self) -> HashMap<String, PathBuf> {
        self.saved
            .lock()
            .map(|saved| saved.clone())
            .unwrap_or_default()
    }

    fn path_for(&self, prompt: &str, result: &GenerationResult, format: ImageFormat) -> PathBuf {
        let folder = self
            .folders
            .get(&result.provider)
            .cloned()
            .unwrap_or_else(|| result.provider.replace(' ', "_"));
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut stem = format!("{}_{timestamp}", sanitize_prompt(prompt));
        if result.slot_label != result.provider {
            stem.push('_');
            stem.push_str(&sanitize_prompt(&result.slot_label));
        }
        self.root
            .join(folder)
            .join(format!("{stem}.{}", format.extension()))
    }
}

#[async_trait]
impl ResultSink for DiskSink {
    async fn accept(&self, prompt: &str, result: &GenerationResult) -> genviz_arena::Result<()> {
        let data = match &result.outcome {
            Ok(RawImage::Bytes(data)) => data.clone(),
            Ok(RawImage::Url(url)) => self
                .client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec(),
            Err(_) => return Ok(()),
        };

        let format = ImageFormat::from_magic_bytes(&data).unwrap_or_default();
        let path = self.path_for(prompt, result, format);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &data)?;
        tracing::debug!(slot = %result.slot_label, path = %path.display(), "saved image");

        if let Ok(mut saved) = self.saved.lock() {
            saved.insert(result.slot_label.clone(), path);
        }
        Ok(())
    }
}

/// Turns a prompt into a file-name stem: punctuation dropped, runs of
/// whitespace and dashes collapsed to `_`, at most 50 characters.
fn sanitize_prompt(prompt: &str) -> String {
    let mut out = String::with_capacity(prompt.len());
    let mut pending_sep = false;
    for c in prompt.chars() {
        if c.is_whitespace() || c == '-' {
            pending_sep = true;
        } else if c.is_alphanumeric() || c == '_' {
            if pending_sep {
                out.push('_');
                pending_sep = false;
            }
            out.push(c);
        }
    }
    if pending_sep {
        out.push('_');
    }
    out.chars().take(MAX_FILE_STEM).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use genviz_arena::credentials::Credential;
    use genviz_arena::GenerationRequest;
    use std::io::Cursor;

    #[test]
    fn test_sanitize_prompt() {
        assert_eq!(sanitize_prompt("A cat, on a mat!"), "A_cat_on_a_mat");
        assert_eq!(sanitize_prompt("sci-fi  city -- night"), "sci_fi_city_night");
        assert_eq!(sanitize_prompt("  padded "), "_padded_");
        assert_eq!(sanitize_prompt(&"x".repeat(80)).len(), MAX_FILE_STEM);
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("openai", 5).unwrap(), ("openai".to_string(), 1));
        assert_eq!(parse_selection("flux-schnell:3", 5).unwrap(), ("flux-schnell".to_string(), 3));
        assert_eq!(parse_selection("openai:9", 5).unwrap(), ("openai".to_string(), 5));
        assert_eq!(parse_selection("openai:0", 5).unwrap(), ("openai".to_string(), 1));
        assert!(parse_selection(":2", 5).is_err());
    }

    #[test]
    fn test_file_config_parses_tables() {
        let file: FileConfig = toml::from_str(
            r#"
            output_dir = "out"

            [dispatch]
            max_concurrency = 4
            task_timeout_secs = 60

            [credentials]
            openai = "sk-test"
            "#,
        )
        .unwrap();
        assert_eq!(file.dispatch.max_concurrency, 4);
        assert_eq!(file.dispatch.task_timeout, Duration::from_secs(60));
        assert_eq!(file.credentials["openai"], "sk-test");
        assert_eq!(file.output_dir, Some(PathBuf::from("out")));
    }

    struct Instant;

    #[async_trait]
    impl ImageProvider for Instant {
        async fn generate(
            &self,
            request: &GenerationRequest,
            _credential: Option<&Credential>,
        ) -> genviz_arena::Result<RawImage> {
            Ok(RawImage::Url(format!("https://img.test/{}.png", request.prompt.len())))
        }

        fn name(&self) -> &str {
            "instant"
        }

        fn requires_credential(&self) -> bool {
            false
        }
    }

    async fn finished_arena() -> Batch {
        let coordinator = DispatchCoordinator::builder().provider(Instant).build().unwrap();
        let request = BatchRequest::new("a red fox").select("instant", 3).arena(true);
        let batch = coordinator.submit_batch(request, &CredentialSet::new()).unwrap();
        batch.wait().await;
        batch
    }

    #[tokio::test]
    async fn test_rank_interactively_submits() {
        let batch = finished_arena().await;
        let mut session = RankingSession::open(&batch).unwrap();
        let last = session.order()[2].clone();

        let input = Cursor::new("up 3\nbogus\nup 9\nsubmit\n");
        let mut output = Vec::new();
        let order = rank_interactively(&mut session, input, &mut output)
            .unwrap()
            .unwrap();

        assert_eq!(order[1], last);
        assert!(session.is_closed());
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Unknown command: bogus"));
        assert!(text.contains("Expected a rank between 1 and 3"));
        assert!(text.contains("Final ranking:"));
    }

    #[tokio::test]
    async fn test_rank_interactively_quit() {
        let batch = finished_arena().await;
        let mut session = RankingSession::open(&batch).unwrap();

        let order = rank_interactively(&mut session, Cursor::new("quit\n"), Vec::new()).unwrap();
        assert!(order.is_none());
        assert!(!session.is_closed());
    }
}
