mod keys;

use clap::Parser;
use keys::{KeyFile, AI_KEY_VAR, CATALOG_KEY_VAR};
use scout_core::run_download;
use scout_protocol::{
    Credentials, DownloadStatus, RunResult, Secret, Selection, SelectionMode, ToneRequest,
    DEFAULT_MAX_RESULTS, DEFAULT_MAX_TONES,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tone-scout", about = "Find and download Tone3000 captures for a described guitar tone")]
struct Args {
    /// Free-text description of the tone you want.
    #[arg(long, required_unless_present = "request_file")]
    request: Option<String>,

    #[arg(long, value_name = "PATH", conflicts_with = "request")]
    request_file: Option<PathBuf>,

    #[arg(long, default_value = "smart_downloaded_tones")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_TONES)]
    max_tones: u8,

    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: u8,

    #[arg(long)]
    gemini_model: Option<String>,

    #[arg(long)]
    tone3000_key: Option<String>,

    #[arg(long)]
    gemini_key: Option<String>,

    #[arg(long, default_value = "keys.txt")]
    keys_file: PathBuf,

    /// Pair each amp with a cabinet IR when the amp needs one.
    #[arg(long, default_value_t = false)]
    rig: bool,

    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let text = match (args.request.clone(), args.request_file.as_ref()) {
        (Some(r), _) => r,
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read request file {}: {e}", path.display()))?,
        (None, None) => return Err(anyhow::anyhow!("missing --request or --request-file")),
    };

    let key_file = KeyFile::load(&args.keys_file);
    let credentials = Credentials {
        catalog_api_key: keys::resolve(args.tone3000_key.as_deref(), CATALOG_KEY_VAR, &key_file)
            .map(Secret::new),
        ai_api_key: keys::resolve(args.gemini_key.as_deref(), AI_KEY_VAR, &key_file)
            .map(Secret::new),
    };

    let request = ToneRequest {
        request: text,
        output_dir: args.output_dir.clone(),
        max_tones: args.max_tones,
        max_results: args.max_results,
        ai_model: args.gemini_model.clone(),
        mode: if args.rig {
            SelectionMode::Rig
        } else {
            SelectionMode::Simple
        },
        credentials,
    };

    tracing::info!(
        output_dir = %request.output_dir.display(),
        mode = ?request.mode,
        "starting run"
    );
    let result = run_download(request).await;
    print_summary(&result);

    let json = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{json}");

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(result: &RunResult) {
    eprintln!("request: {}", result.request);
    eprintln!("model:   {}", result.ai_model);
    if let Some(a) = result.analysis.as_ref() {
        eprintln!("intent:  {}", a.description);
        eprintln!("queries: {}", a.search_queries.join(" | "));
    }
    eprintln!("pool:    {} candidate(s)", result.pool_size);

    match result.selection.as_ref() {
        Some(Selection::Profiles(profiles)) => {
            eprintln!("selected:");
            for p in profiles {
                eprintln!("  - {} (id {}, {})", p.title, p.id, p.platform);
            }
        }
        Some(Selection::Rigs(rigs)) => {
            eprintln!("rigs:");
            for r in rigs {
                let cab = r
                    .cabinet
                    .as_ref()
                    .map(|c| c.title.as_str())
                    .unwrap_or("(no cab)");
                eprintln!("  - {} + {}", r.amp.title, cab);
            }
        }
        None => {}
    }

    if !result.downloads.is_empty() {
        eprintln!("files:");
        for d in &result.downloads {
            let mark = match d.status {
                DownloadStatus::Downloaded => "ok  ",
                DownloadStatus::Skipped => "skip",
                DownloadStatus::Failed => "FAIL",
            };
            eprintln!("  [{mark}] {}", d.path.display());
        }
    }
    let c = result.counts;
    eprintln!(
        "counts:  attempted={} downloaded={} skipped={} failed={}",
        c.attempted, c.downloaded, c.skipped, c.failed
    );
    if let Some(e) = result.error.as_ref() {
        eprintln!("error:   {:?} at {:?}: {}", e.kind, e.stage, e.message);
    }
}
