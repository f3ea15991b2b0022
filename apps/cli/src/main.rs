use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fuota_core::{
    Aes128Key, Config, DeploymentState, DevAddr, DeviceKeys, Eui64, FirmwareImage,
    FuotaDeployment, GroupType, MemoryMulticastGroups, MemoryStore, RecordingDispatcher, Services,
    Store, crypto, scheduler,
};
use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "LoRaWAN FUOTA orchestrator", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a deployment against the in-memory backend (dry run)
    Run {
        /// Path to the TOML configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the firmware image
        #[arg(long)]
        firmware: PathBuf,

        /// Path to the TOML device list
        #[arg(long)]
        devices: PathBuf,

        /// Deployment name
        #[arg(long, default_value = "fuota")]
        name: String,

        /// Fragment size in bytes
        #[arg(long, default_value_t = 50)]
        frag_size: usize,

        /// Number of redundancy fragments
        #[arg(long, default_value_t = 0)]
        redundancy: usize,

        /// Class-C session timeout exponent (session lasts 2^n seconds)
        #[arg(long, default_value_t = 0)]
        multicast_timeout: u8,

        /// Per-device unicast timeout in seconds
        #[arg(long, default_value_t = 60)]
        unicast_timeout: u64,

        /// Multicast downlink frequency in Hz
        #[arg(long, default_value_t = 869_525_000)]
        frequency: u32,

        /// Multicast data rate
        #[arg(long, default_value_t = 0)]
        dr: u8,
    },
    /// Derive multicast session keys and the wrapped McKey
    Keys {
        /// Multicast group key (hex)
        #[arg(long)]
        mc_key: Aes128Key,

        /// Multicast address (hex)
        #[arg(long)]
        mc_addr: DevAddr,

        /// LoRaWAN 1.1 AppKey of a device (hex)
        #[arg(long, conflicts_with = "gen_app_key")]
        app_key: Option<Aes128Key>,

        /// LoRaWAN 1.0.x GenAppKey of a device (hex)
        #[arg(long)]
        gen_app_key: Option<Aes128Key>,
    },
    /// Fragment a firmware image and print the resulting layout
    Fragment {
        /// Path to the firmware image
        #[arg(long)]
        firmware: PathBuf,

        /// Fragment size in bytes
        #[arg(long)]
        frag_size: usize,

        /// Number of redundancy fragments
        #[arg(long, default_value_t = 0)]
        redundancy: usize,
    },
    /// Write the default configuration
    Config {
        /// Output file
        #[arg(long)]
        output: PathBuf,
    },
}

/// Device list read by `run`.
#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: Vec<DeviceKeys>,
}

fn load_devices(path: &Path) -> Result<Vec<DeviceKeys>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read devices {}", path.display()))?;
    let list: DeviceList = toml::from_str(&content).context("parse devices error")?;
    if list.devices.is_empty() {
        bail!("device list {} is empty", path.display());
    }
    Ok(list.devices)
}

struct RunArgs {
    config: Option<PathBuf>,
    firmware: PathBuf,
    devices: PathBuf,
    name: String,
    frag_size: usize,
    redundancy: usize,
    multicast_timeout: u8,
    unicast_timeout: u64,
    frequency: u32,
    dr: u8,
}

async fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    let payload = std::fs::read(&args.firmware)
        .with_context(|| format!("read firmware {}", args.firmware.display()))?;
    let devices = load_devices(&args.devices)?;

    let store = MemoryStore::new();
    let dispatcher = RecordingDispatcher::new();
    let services = Services::new(
        Arc::new(store.clone()),
        Arc::new(dispatcher.clone()),
        Arc::new(MemoryMulticastGroups::new()),
    );

    let mut deployment = FuotaDeployment::new(args.name, payload, services.clock.now());
    deployment.group_type = GroupType::C;
    deployment.frag_size = args.frag_size;
    deployment.redundancy = args.redundancy;
    deployment.multicast_timeout = args.multicast_timeout;
    deployment.unicast_timeout = Duration::from_secs(args.unicast_timeout);
    deployment.frequency = args.frequency;
    deployment.dr = args.dr;
    deployment.validate()?;

    let mut tx = store.begin().await.context("begin transaction error")?;
    for keys in &devices {
        tx.create_device_keys(keys)
            .await
            .with_context(|| format!("create device {}", keys.dev_eui))?;
    }
    let dev_euis: Vec<Eui64> = devices.iter().map(|d| d.dev_eui).collect();
    tx.create_fuota_deployment(&deployment, &dev_euis)
        .await
        .context("create fuota deployment error")?;
    tx.commit().await.context("commit transaction error")?;

    info!(
        deployment_id = %deployment.id,
        devices = dev_euis.len(),
        size = deployment.payload.len(),
        "Deployment created"
    );

    let cancel = scheduler::start(&config, services);
    let mut poll = tokio::time::interval(config.fuota_deployment.interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
            _ = poll.tick() => {
                let mut tx = store.begin().await.context("begin transaction error")?;
                let state = tx.get_fuota_deployment(deployment.id).await?.state;
                if state == DeploymentState::Done {
                    break;
                }
            }
        }
    }
    cancel.cancel();

    let mut tx = store.begin().await.context("begin transaction error")?;
    for d in tx.get_fuota_deployment_devices(deployment.id).await? {
        if d.error_message.is_empty() {
            info!(dev_eui = %d.dev_eui, state = %d.state, "Device result");
        } else {
            warn!(dev_eui = %d.dev_eui, state = %d.state, error = %d.error_message, "Device result");
        }
    }
    info!(
        unicast = dispatcher.downlinks().len(),
        multicast = dispatcher.multicast_downlinks().len(),
        "Downlinks enqueued"
    );
    Ok(())
}

fn keys(
    mc_key: Aes128Key,
    mc_addr: DevAddr,
    app_key: Option<Aes128Key>,
    gen_app_key: Option<Aes128Key>,
) {
    println!("McAppSKey:      {}", crypto::mc_app_s_key(&mc_key, mc_addr));
    println!("McNetSKey:      {}", crypto::mc_net_s_key(&mc_key, mc_addr));

    let mc_root_key = match (app_key, gen_app_key) {
        (Some(k), _) => crypto::mc_root_key_for_app_key(&k),
        (None, Some(k)) => crypto::mc_root_key_for_gen_app_key(&k),
        (None, None) => return,
    };
    let mc_ke_key = crypto::mc_ke_key(&mc_root_key);
    println!("McRootKey:      {}", mc_root_key);
    println!("McKEKey:        {}", mc_ke_key);
    println!("McKeyEncrypted: {}", crypto::encrypt_mc_key(&mc_ke_key, &mc_key));
}

fn fragment(firmware: &Path, frag_size: usize, redundancy: usize) -> Result<()> {
    let data = std::fs::read(firmware)
        .with_context(|| format!("read firmware {}", firmware.display()))?;
    let image = FirmwareImage::new(data, frag_size)?;
    let fragments = image.data_fragments(0, redundancy)?;

    println!("Size:       {} bytes", image.len());
    println!("FragSize:   {}", image.frag_size());
    println!("Padding:    {}", image.padding());
    println!("NbFrag:     {}", image.nb_frag());
    println!("Redundancy: {}", redundancy);
    for f in &fragments {
        let encoded = fuota_core::applayer::fragmentation::Command::DataFragment(f.clone())
            .to_bytes()
            .context("marshal binary error")?;
        println!("  #{:<5} {} bytes", f.n, encoded.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match args.command {
        Commands::Run {
            config,
            firmware,
            devices,
            name,
            frag_size,
            redundancy,
            multicast_timeout,
            unicast_timeout,
            frequency,
            dr,
        } => {
            run(RunArgs {
                config,
                firmware,
                devices,
                name,
                frag_size,
                redundancy,
                multicast_timeout,
                unicast_timeout,
                frequency,
                dr,
            })
            .await
        }
        Commands::Keys {
            mc_key,
            mc_addr,
            app_key,
            gen_app_key,
        } => {
            keys(mc_key, mc_addr, app_key, gen_app_key);
            Ok(())
        }
        Commands::Fragment {
            firmware,
            frag_size,
            redundancy,
        } => fragment(&firmware, frag_size, redundancy),
        Commands::Config { output } => Config::default()
            .save_to_file(&output)
            .map(|_| info!("Configuration written to {}", output.display())),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
