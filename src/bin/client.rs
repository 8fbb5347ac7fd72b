use argh::FromArgs;
use diffusion_gateway::{
    Txt2ImgRequest,
    messages::{HealthResponse, SdModel},
};
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};

// defaults for the client
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8000;

#[derive(FromArgs)]
/// Client for the diffusion gateway endpoints
struct ClientArgs {
    /// the host to connect to
    #[argh(option, default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to connect to
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// command to execute: "health", "models", "txt2img" or "upload"
    #[argh(subcommand)]
    command: ClientCommands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ClientCommands {
    Health(HealthCommand),
    Models(ModelsCommand),
    Txt2Img(Txt2ImgCommand),
    Upload(UploadCommand),
}

#[derive(FromArgs)]
/// Check whether the pipeline is loaded
#[argh(subcommand, name = "health")]
struct HealthCommand {}

#[derive(FromArgs)]
/// List the served models
#[argh(subcommand, name = "models")]
struct ModelsCommand {}

#[derive(FromArgs)]
/// Generate an image from a prompt
#[argh(subcommand, name = "txt2img")]
struct Txt2ImgCommand {
    /// the prompt to use
    #[argh(option)]
    prompt: String,

    /// where to write the PNG
    #[argh(option, short = 'o')]
    output: PathBuf,

    /// image width in pixels
    #[argh(option, default = "512")]
    width: u32,

    /// image height in pixels
    #[argh(option, default = "512")]
    height: u32,

    /// number of denoising steps
    #[argh(option, default = "20")]
    steps: usize,

    /// classifier-free guidance scale
    #[argh(option, default = "7.5")]
    guidance_scale: f64,
}

#[derive(FromArgs)]
/// Send an image to one of the upload endpoints
#[argh(subcommand, name = "upload")]
struct UploadCommand {
    /// endpoint: generate_bg, inpaint, edit or expand
    #[argh(option, short = 'e')]
    endpoint: String,

    /// the path to the image
    #[argh(option, short = 'i')]
    image_path: PathBuf,

    /// the path to the mask
    #[argh(option, short = 'm')]
    mask_path: Option<PathBuf>,

    /// the prompt to use
    #[argh(option)]
    prompt: Option<String>,

    /// where to write the PNG
    #[argh(option, short = 'o')]
    output: PathBuf,
}

async fn file_part(path: &Path) -> Result<Part, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.png".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}

async fn save_png(
    response: reqwest::Response,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await?;
        return Err(format!("server answered {}: {}", status, body).into());
    }

    let bytes = response.bytes().await?;
    tokio::fs::write(output, &bytes).await?;
    println!("Wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: ClientArgs = argh::from_env();

    let client = reqwest::Client::new();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    match args.command {
        ClientCommands::Health(_) => {
            let health = client
                .get(format!("http://{}/health", addr))
                .send()
                .await?
                .json::<HealthResponse>()
                .await?;
            println!("Status: {} {:?}", health.status, health.models);
        }
        ClientCommands::Models(_) => {
            let models = client
                .get(format!("http://{}/sdapi/v1/sd-models", addr))
                .send()
                .await?
                .json::<Vec<SdModel>>()
                .await?;
            println!("Models: {}", serde_json::to_string_pretty(&models)?);
        }
        ClientCommands::Txt2Img(command) => {
            let request = Txt2ImgRequest {
                width: command.width,
                height: command.height,
                num_inference_steps: command.steps,
                guidance_scale: command.guidance_scale,
                ..Txt2ImgRequest::new(command.prompt)
            };
            let response = client
                .post(format!("http://{}/sdapi/v1/txt2img", addr))
                .json(&request)
                .send()
                .await?;
            save_png(response, &command.output).await?;
        }
        ClientCommands::Upload(command) => {
            let mut form = Form::new().part("image", file_part(&command.image_path).await?);
            if let Some(mask_path) = &command.mask_path {
                form = form.part("mask", file_part(mask_path).await?);
            }
            if let Some(prompt) = command.prompt {
                form = form.text("prompt", prompt);
            }

            let response = client
                .post(format!("http://{}/{}", addr, command.endpoint))
                .multipart(form)
                .send()
                .await?;
            save_png(response, &command.output).await?;
        }
    }

    Ok(())
}
