use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use neural_render_contracts::output::OutputFormat;
use reqwest::blocking::Client as HttpClient;
use reqwest::StatusCode;

use crate::error::OperationError;
use crate::replicate::truncate_text;

/// Fetches the bytes behind a result URL.
pub trait ResultFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, OperationError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    http: HttpClient,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(http: HttpClient) -> Self {
        Self { http }
    }
}

impl ResultFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, OperationError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| OperationError::Download {
                status: None,
                detail: format!("request to {url} failed: {err}"),
            })?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().unwrap_or_default();
            return Err(OperationError::Download {
                status: Some(status.as_u16()),
                detail: truncate_text(&body, 512),
            });
        }
        let bytes = response.bytes().map_err(|err| OperationError::Download {
            status: Some(status.as_u16()),
            detail: format!("failed reading body: {err}"),
        })?;
        Ok(bytes.to_vec())
    }
}

/// `<source stem>_<suffix>.<extension>`.
pub fn output_file_name(source: &Path, suffix: &str, format: OutputFormat) -> String {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{stem}_{suffix}.{}", format.extension())
}

/// Source directory, else project directory, else the system temp directory.
pub fn resolve_output_dir(source: &Path, project_dir: Option<&Path>) -> PathBuf {
    source
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .or_else(|| project_dir.filter(|dir| !dir.as_os_str().is_empty()))
        .map(Path::to_path_buf)
        .unwrap_or_else(env::temp_dir)
}

pub fn output_path(
    source: &Path,
    suffix: &str,
    format: OutputFormat,
    project_dir: Option<&Path>,
) -> PathBuf {
    resolve_output_dir(source, project_dir).join(output_file_name(source, suffix, format))
}

/// Downloads `url` and writes it to `target`, replacing any existing file.
///
/// Nothing touches the filesystem until the download succeeded.
pub fn persist(
    fetcher: &dyn ResultFetcher,
    url: &str,
    target: &Path,
) -> Result<PathBuf, OperationError> {
    let bytes = fetcher.fetch(url)?;
    if let Some(parent) = target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| OperationError::Persist {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(target, &bytes).map_err(|source| OperationError::Persist {
        path: target.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %target.display(), bytes = bytes.len(), "persisted result");
    Ok(target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::path::{Path, PathBuf};

    use neural_render_contracts::output::OutputFormat;

    use super::{
        output_file_name, output_path, persist, resolve_output_dir, HttpFetcher, ResultFetcher,
    };
    use crate::error::OperationError;
    use crate::test_support::{local_http_client, serve_once};

    #[test]
    fn file_names_derive_from_source_stem() {
        assert_eq!(
            output_file_name(Path::new("render.png"), "ai", OutputFormat::Jpg),
            "render_ai.jpg"
        );
        assert_eq!(
            output_file_name(Path::new("/tmp/x.png"), "upscaled", OutputFormat::Png),
            "x_upscaled.png"
        );
        assert_eq!(
            output_file_name(Path::new("/renders/shot.010.exr"), "ai", OutputFormat::Webp),
            "shot.010_ai.webp"
        );
    }

    #[test]
    fn output_dir_prefers_source_then_project_then_temp() {
        let project = Path::new("/projects/scene");
        assert_eq!(
            resolve_output_dir(Path::new("/renders/frame.png"), Some(project)),
            PathBuf::from("/renders")
        );
        assert_eq!(
            resolve_output_dir(Path::new("frame.png"), Some(project)),
            PathBuf::from("/projects/scene")
        );
        assert_eq!(
            resolve_output_dir(Path::new("frame.png"), Some(Path::new(""))),
            env::temp_dir()
        );
        assert_eq!(resolve_output_dir(Path::new("frame.png"), None), env::temp_dir());
        assert_eq!(
            output_path(Path::new("frame.png"), "ai", OutputFormat::Png, Some(project)),
            PathBuf::from("/projects/scene/frame_ai.png")
        );
    }

    struct StaticFetcher(Result<Vec<u8>, u16>);

    impl ResultFetcher for StaticFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, OperationError> {
            self.0.clone().map_err(|status| OperationError::Download {
                status: Some(status),
                detail: "static".to_string(),
            })
        }
    }

    #[test]
    fn persist_creates_directory_and_overwrites() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = temp.path().join("out").join("render_ai.png");
        std::fs::create_dir_all(temp.path().join("out"))?;
        std::fs::write(&target, b"old")?;

        let written = persist(&StaticFetcher(Ok(b"new".to_vec())), "https://x.test/a", &target)?;
        assert_eq!(written, target);
        assert_eq!(std::fs::read(&target)?, b"new");

        let nested = temp.path().join("a").join("b").join("c_ai.png");
        persist(&StaticFetcher(Ok(b"x".to_vec())), "https://x.test/a", &nested)?;
        assert!(nested.exists());
        Ok(())
    }

    #[test]
    fn failed_download_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = temp.path().join("missing-dir").join("render_ai.png");
        let err = persist(&StaticFetcher(Err(404)), "https://x.test/a", &target).unwrap_err();
        assert!(matches!(err, OperationError::Download { status: Some(404), .. }));
        assert!(!target.exists());
        assert!(!temp.path().join("missing-dir").exists());
        Ok(())
    }

    #[test]
    fn http_fetcher_reports_status_code() {
        let (base, _server) = serve_once("404 Not Found", "text/plain", b"gone".to_vec());
        let fetcher = HttpFetcher::with_http_client(local_http_client());
        let err = fetcher.fetch(&format!("{base}/result.png")).unwrap_err();
        match err {
            OperationError::Download { status, detail } => {
                assert_eq!(status, Some(404));
                assert_eq!(detail, "gone");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn http_fetcher_rejects_success_codes_other_than_200() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = temp.path().join("render_ai.png");
        let (base, _server) = serve_once(
            "203 Non-Authoritative Information",
            "text/html",
            b"<html>proxy page</html>".to_vec(),
        );
        let fetcher = HttpFetcher::with_http_client(local_http_client());
        let err = persist(&fetcher, &format!("{base}/result.png"), &target).unwrap_err();
        assert!(matches!(err, OperationError::Download { status: Some(203), .. }));
        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn http_fetcher_returns_body_bytes() -> anyhow::Result<()> {
        let (base, server) = serve_once("200 OK", "image/png", vec![0x89, b'P', b'N', b'G']);
        let fetcher = HttpFetcher::with_http_client(local_http_client());
        let bytes = fetcher.fetch(&format!("{base}/result.png"))?;
        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
        let request = server.join().map_err(|_| anyhow::anyhow!("server panicked"))?;
        assert!(request.starts_with("GET /result.png "));
        Ok(())
    }
}
