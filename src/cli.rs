use std::path::Path;
use std::sync::Arc;

use crate::client::GatewayProvider;
use crate::config::Config;
use crate::error::io_err;
use crate::fal::EndpointId;
use crate::models::ImageUpload;
use crate::workflow::{WorkflowController, WorkflowSettings};

pub async fn load_image(path: &Path) -> std::io::Result<ImageUpload> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io_err(format!("{} has no usable file name", path.display())))?
        .to_owned();

    Ok(ImageUpload {
        file_name,
        content_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
        bytes,
    })
}

/// Runs one job through a gateway, printing progress as it changes, and
/// returns the video URL.
pub async fn generate(
    config: &Config,
    image: &Path,
    prompt: &str,
    gateway: &str,
) -> std::io::Result<String> {
    let upload = load_image(image).await?;
    let endpoint = EndpointId::parse(&config.endpoint_id).map_err(io_err)?;
    let provider = GatewayProvider::new(
        gateway,
        endpoint,
        &config.queue_url,
        &config.rest_url,
    );

    let controller = WorkflowController::new(Arc::new(provider), WorkflowSettings::default());
    let mut updates = controller.subscribe();

    controller.submit(Some(upload), prompt).map_err(io_err)?;

    let mut last_progress = String::new();

    loop {
        let state = updates.borrow_and_update().clone();

        if !state.progress.is_empty() && state.progress != last_progress {
            println!("{}", state.progress);
            last_progress = state.progress;
        }

        if state.phase.is_terminal() {
            return match state.video_url {
                Some(url) => Ok(url),
                None => Err(io_err(
                    state
                        .error
                        .unwrap_or_else(|| format!("job ended in {:?}", state.phase)),
                )),
            };
        }

        if updates.changed().await.is_err() {
            return Err(io_err("workflow stopped before finishing"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn content_type_is_guessed_from_extension() {
        let dir = std::env::temp_dir().join(format!("veo-relay-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        for (name, expected) in [
            ("cat.PNG", "image/png"),
            ("b.jpeg", "image/jpeg"),
            ("scan.bmp", "image/bmp"),
            ("shot.tiff", "image/tiff"),
            ("icon.svg", "image/svg+xml"),
            ("noext", "application/octet-stream"),
        ] {
            let path = dir.join(name);
            tokio::fs::write(&path, b"bytes").await.unwrap();

            let upload = load_image(&path).await.unwrap();
            assert_eq!(upload.content_type, expected, "{name}");
            assert_eq!(upload.file_name, name);
            assert_eq!(upload.bytes, b"bytes");
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_image_file_is_an_io_error() {
        let err = load_image(Path::new("does/not/exist.png")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
