use argh::FromArgs;
use axum::Router;
use diffusion_gateway::{
    DiffusionConfig, DiffusionPipeline, ServiceContext,
    diffusion::{DEFAULT_MODEL_ID, DEFAULT_TOKENIZER_ID},
    service, uploads,
};

// defaults for the server
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;

#[derive(FromArgs)]
/// Serves image generation models over HTTP.
struct GatewayArgs {
    /// the host to run the server on
    #[argh(option, default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// which service to run: "uploads" or "diffusion"
    #[argh(subcommand)]
    service: ServiceCommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ServiceCommand {
    Uploads(UploadsCommand),
    Diffusion(DiffusionCommand),
}

#[derive(FromArgs)]
/// Serve the multipart image editing endpoints
#[argh(subcommand, name = "uploads")]
struct UploadsCommand {}

#[derive(FromArgs)]
/// Serve the text-to-image API backed by Stable Diffusion
#[argh(subcommand, name = "diffusion")]
struct DiffusionCommand {
    /// hub repository with the diffusion weights
    #[argh(option, default = "DEFAULT_MODEL_ID.to_string()")]
    model_id: String,

    /// hub repository with the CLIP tokenizer
    #[argh(option, default = "DEFAULT_TOKENIZER_ID.to_string()")]
    tokenizer_id: String,

    /// run on CPU even if a GPU is available
    #[argh(switch)]
    cpu: bool,
}

async fn diffusion_app(command: DiffusionCommand) -> Result<Router, Box<dyn std::error::Error>> {
    let config = DiffusionConfig {
        model_id: command.model_id,
        tokenizer_id: command.tokenizer_id,
        cpu: command.cpu,
    };

    // weights are fetched and mapped before the listener is bound
    let context = tokio::task::spawn_blocking(move || {
        ServiceContext::load(config.model_name(), || DiffusionPipeline::load(&config))
    })
    .await?;

    Ok(service::router(context))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: GatewayArgs = argh::from_env();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    let app = match args.service {
        ServiceCommand::Uploads(_) => uploads::router(),
        ServiceCommand::Diffusion(command) => diffusion_app(command).await?,
    };

    log::info!("Starting the server");
    log::info!("Listening on: {}", addr);
    log::info!("Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
