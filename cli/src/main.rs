//! Command-line front end for Fichero / D11s label printers.
//!
//! The target device comes from `--address`, then `FICHERO_ADDRESS`
//! (a `.env` file is honoured), then the first printer found by scanning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use fichero::imaging::{self, DEFAULT_MAX_ROWS};
use fichero::options::DENSITY_MAX;
use fichero::raster;
use fichero::{
    BleConnector, ClientConfig, DeviceSelector, FicheroClient, LabelType, PrintDirection,
    PrintTaskOptions,
};

const ADDRESS_ENV: &str = "FICHERO_ADDRESS";

#[derive(Parser, Debug)]
#[command(name = "fichero")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Printer address, platform id or advertised name
    #[arg(long, global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List nearby printers
    Scan,

    /// Show model, firmware, serial, battery and status
    Info,

    /// Show decoded status flags
    Status,

    /// Print an image file
    Print {
        path: PathBuf,

        /// Print density: 0 light, 1 medium, 2 thick
        #[arg(long, default_value_t = DENSITY_MAX, value_parser = clap::value_parser!(u8).range(0..=2))]
        density: u8,

        /// Paper type: gap, black or continuous (or 1-3)
        #[arg(long, default_value = "gap", value_parser = parse_label_type)]
        paper: LabelType,

        #[arg(long, default_value_t = 1)]
        copies: u32,

        /// Use a plain threshold instead of Floyd-Steinberg dithering
        #[arg(long)]
        no_dither: bool,

        /// Label length in mm (8 dots per mm)
        #[arg(long, conflicts_with = "label_height")]
        label_length: Option<u32>,

        /// Label length in dots
        #[arg(long)]
        label_height: Option<u32>,
    },

    /// Change a persistent printer setting
    Set {
        #[command(subcommand)]
        setting: Setting,
    },

    /// Restore factory settings
    Reset,

    /// Stay connected and print events as JSON lines until Ctrl-C
    Watch,
}

#[derive(Subcommand, Debug)]
enum Setting {
    /// Default print density (0-2)
    Density { value: u8 },
    /// Auto-shutdown timeout in minutes (1-480)
    Shutdown { minutes: u16 },
    /// Paper type: gap, black or continuous (or 1-3)
    Paper {
        #[arg(value_parser = parse_label_type)]
        value: LabelType,
    },
}

fn parse_label_type(raw: &str) -> Result<LabelType, String> {
    LabelType::parse(raw).ok_or_else(|| format!("unknown paper type '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if dotenvy::dotenv().is_ok() {
        tracing::debug!("Loaded .env");
    }

    let cli = Cli::parse();
    let selector = cli
        .address
        .or_else(|| std::env::var(ADDRESS_ENV).ok())
        .map(|target| DeviceSelector::parse(&target))
        .unwrap_or_default();

    match cli.command {
        Commands::Scan => scan().await,
        Commands::Info => info(&selector).await,
        Commands::Status => status(&selector).await,
        Commands::Print {
            path,
            density,
            paper,
            copies,
            no_dither,
            label_length,
            label_height,
        } => {
            let max_rows = label_length
                .map(imaging::label_rows_for_mm)
                .or(label_height)
                .unwrap_or(DEFAULT_MAX_ROWS);
            let options = PrintTaskOptions::new()
                .with_density(density)
                .with_label_type(paper)
                .with_total_pages(copies);
            print(&selector, &path, options, !no_dither, max_rows).await
        }
        Commands::Set { setting } => set(&selector, setting).await,
        Commands::Reset => reset(&selector).await,
        Commands::Watch => watch(&selector).await,
    }
}

async fn connect(selector: &DeviceSelector, config: ClientConfig) -> anyhow::Result<FicheroClient> {
    let connector = BleConnector::new().await?;
    let client = FicheroClient::new(Arc::new(connector), config);
    client
        .connect(selector)
        .await
        .with_context(|| format!("could not connect to {selector:?}"))?;
    Ok(client)
}

/// Connect without the automatic info fetch and heartbeat.
async fn connect_quiet(selector: &DeviceSelector) -> anyhow::Result<FicheroClient> {
    connect(
        selector,
        ClientConfig::new()
            .with_fetch_info_on_connect(false)
            .with_heartbeat_on_connect(false),
    )
    .await
}

async fn scan() -> anyhow::Result<()> {
    let connector = BleConnector::new().await?;
    let devices = connector.scan().await?;
    if devices.is_empty() {
        println!("No printers found.");
    }
    for d in devices {
        println!("  {}  {}", d.id, d.name);
    }
    Ok(())
}

async fn info(selector: &DeviceSelector) -> anyhow::Result<()> {
    let client = connect(selector, ClientConfig::new().with_heartbeat_on_connect(false)).await?;

    let info = client.printer_info().unwrap_or_default();
    let show = |v: Option<String>| v.unwrap_or_else(|| "?".into());
    println!("  model: {}", show(info.model_id));
    println!("  firmware: {}", show(info.firmware));
    println!("  serial: {}", show(info.serial));
    println!("  battery: {}", show(info.battery.map(|b| format!("{b}%"))));
    println!("  charging: {}", show(info.charging.map(|c| c.to_string())));
    println!("  status: {}", show(info.status));
    println!("  boot: {}", show(client.boot_version().await?));
    println!(
        "  shutdown: {}",
        show(client.shutdown_time().await?.map(|m| format!("{m} min")))
    );

    if let Some(all) = client.all_info().await? {
        println!();
        println!("  bt_name: {}", all.bt_name);
        println!("  mac_classic: {}", all.mac_classic);
        println!("  mac_ble: {}", all.mac_ble);
        println!("  firmware: {}", all.firmware);
        println!("  serial: {}", all.serial);
        println!("  battery: {}", all.battery);
    }

    client.disconnect().await;
    Ok(())
}

async fn status(selector: &DeviceSelector) -> anyhow::Result<()> {
    let client = connect_quiet(selector).await?;
    let result = client.status().await;
    client.disconnect().await;

    let Some(status) = result? else {
        bail!("printer did not answer the status query");
    };
    println!("  Status: {status}");
    println!("  Raw: 0x{:02X} ({:08b})", status.raw(), status.raw());
    println!(
        "  printing={} cover_open={} no_paper={} low_battery={} overheated={} charging={}",
        status.printing(),
        status.cover_open(),
        status.no_paper(),
        status.low_battery(),
        status.overheated(),
        status.charging()
    );
    Ok(())
}

async fn print(
    selector: &DeviceSelector,
    path: &Path,
    options: PrintTaskOptions,
    dither: bool,
    max_rows: u32,
) -> anyhow::Result<()> {
    let img = image::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let prepared = imaging::prepare_image(&img, max_rows, dither);
    // Prepared bitmaps are already 96 px across the head.
    let encoded = raster::encode(&prepared, PrintDirection::Top);
    println!(
        "  Image: {}x{}, {} bytes, {} copies",
        prepared.width(),
        encoded.rows(),
        encoded.data().len(),
        options.total_pages
    );

    let client = connect_quiet(selector).await?;
    let result = client.print_encoded(&encoded, options).await;
    client.disconnect().await;
    result?;

    println!("Done.");
    Ok(())
}

async fn set(selector: &DeviceSelector, setting: Setting) -> anyhow::Result<()> {
    let client = connect_quiet(selector).await?;
    let result = match &setting {
        Setting::Density { value } => client.set_density(*value).await,
        Setting::Shutdown { minutes } => client.set_shutdown_time(*minutes).await,
        Setting::Paper { value } => client.set_paper_type(*value).await,
    };
    client.disconnect().await;

    let ok = result?;
    println!("  Set {setting:?}: {}", if ok { "OK" } else { "FAILED" });
    Ok(())
}

async fn reset(selector: &DeviceSelector) -> anyhow::Result<()> {
    let client = connect_quiet(selector).await?;
    let result = client.printer_reset().await;
    client.disconnect().await;

    println!("  Factory reset: {}", if result? { "OK" } else { "FAILED" });
    Ok(())
}

async fn watch(selector: &DeviceSelector) -> anyhow::Result<()> {
    let connector = BleConnector::new().await?;
    let client = FicheroClient::new(Arc::new(connector), ClientConfig::default());
    // Subscribe first so the connect and info events are printed too.
    let mut events = client.subscribe();
    client
        .connect(selector)
        .await
        .with_context(|| format!("could not connect to {selector:?}"))?;

    tracing::info!("Watching printer events. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let line = serde_json::json!({
                        "ts": chrono::Utc::now().to_rfc3339(),
                        "event": event,
                    });
                    println!("{line}");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Shutting down...");
    client.disconnect().await;
    Ok(())
}
