//! A tar.gz archive plugin.
//!
//! Speaks the shipwright plugin protocol over stdin/stdout: handshake via
//! heartbeat echo, then archive requests encoded with the configured
//! codec. Doubles as the reference implementation for out-of-tree format
//! plugins.

use std::fs::File;
use std::process;

use clap::Parser;
use serde::Deserialize;

use shipwright::archive::{Archiver, TarGzArchiver};
use shipwright_plugin_api::{serve, ArchiveRequest, ArchiveResponse, Dispatcher, WireCodec};

#[derive(Parser)]
#[command(name = "shipwright-plugin-tar")]
#[command(about = "tar.gz archive plugin for shipwright", version)]
struct Cli {
    /// Body codec; must match the orchestrator's plugin descriptor.
    #[arg(long, default_value = "toml")]
    codec: WireCodec,
}

const PLUGIN_ID: &str = "tar";

/// The typed view of the request's loose settings map. Decoded strictly up
/// front so a misconfigured archive fails with a clear message instead of
/// being silently ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TarSettings {
    /// Strip this prefix from every target path.
    #[serde(default)]
    strip_prefix: String,
}

impl TarSettings {
    fn from_request(request: &ArchiveRequest) -> Result<TarSettings, String> {
        if request.settings.is_empty() {
            return Ok(TarSettings::default());
        }
        let value = serde_json::Value::Object(
            request
                .settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        serde_json::from_value(value).map_err(|e| format!("invalid tar settings: {e}"))
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = serve(cli.codec, handle) {
        eprintln!("shipwright-plugin-tar: {err}");
        process::exit(1);
    }
}

fn handle(dispatcher: &mut Dispatcher<'_>, request: ArchiveRequest) -> ArchiveResponse {
    dispatcher.info(&format!(
        "archiving {} files to {}",
        request.files.len(),
        request.out_filename.display()
    ));
    match archive(&request) {
        Ok(()) => ArchiveResponse::ok(),
        Err(message) => ArchiveResponse::from_error(PLUGIN_ID, message),
    }
}

fn archive(request: &ArchiveRequest) -> Result<(), String> {
    let settings = TarSettings::from_request(request)?;

    if let Some(parent) = request.out_filename.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("{}: {e}", parent.display()))?;
    }
    let out = File::create(&request.out_filename)
        .map_err(|e| format!("{}: {e}", request.out_filename.display()))?;

    let mut archiver = TarGzArchiver::new(out);
    for file in &request.files {
        let f = File::open(&file.source_path)
            .map_err(|e| format!("{}: {e}", file.source_path.display()))?;
        let target = file
            .target_path
            .strip_prefix(&settings.strip_prefix)
            .unwrap_or(&file.target_path)
            .trim_start_matches('/');
        archiver
            .add_and_close(target, f, file.mode)
            .map_err(|e| e.to_string())?;
    }
    archiver.finalize().map_err(|e| e.to_string())
}
