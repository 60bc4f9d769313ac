use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use veo_relay::cli::generate;
use veo_relay::config::Config;
use veo_relay::web::start_web_server;

#[derive(Parser)]
#[command(name = "veo-relay", version, about = "Image-to-video gateway for the fal queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (credential-guarded proxy and result endpoint).
    Serve,
    /// Animate an image through a running gateway and print the video URL.
    Generate {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "http://127.0.0.1:3600")]
        gateway: String,
    },
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "veo_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Serve => start_web_server(config).await,
        Command::Generate {
            image,
            prompt,
            gateway,
        } => {
            let video_url = generate(&config, &image, &prompt, &gateway).await?;
            println!("{video_url}");
            Ok(())
        }
    }
}
