use clap::Parser;
use client_hub::cli::{print_completions, Args};
use client_hub::config::HubConfig;
use client_hub::{repl, web, ClientHub};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        print_completions(shell);
        return Ok(());
    }

    // Logs go to stderr so they never interleave with the transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("client_hub=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = HubConfig::resolve(&args)?;
    let hub = ClientHub::from_config(&config)?;

    if args.web {
        if args.connect {
            hub.session.request_connect(&hub.default_address)?;
        }
        web::serve(hub, config.web.port, config.web.token.clone()).await?;
        return Ok(());
    }

    repl::run(hub, args.connect).await?;
    Ok(())
}
