//! PhysioNet client for fetching DREAMT subject files.
//!
//! The engine only ever reads subject files that already exist locally;
//! this module is how they get there. Downloads are resumable at file
//! granularity: a local file whose size matches the remote
//! `Content-Length` is left alone, anything else is fetched again.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// PhysioNet login form.
pub const PHYSIONET_LOGIN_URL: &str = "https://physionet.org/login/";

/// 64 Hz subject files of DREAMT 2.0.0.
pub const DREAMT_DATA_URL: &str = "https://physionet.org/files/dreamt/2.0.0/data_64Hz";

/// Transfer chunk size.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub login_url: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl DownloadConfig {
    /// Configuration against the public DREAMT archive.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login_url: PHYSIONET_LOGIN_URL.to_string(),
            base_url: DREAMT_DATA_URL.to_string(),
            username: username.into(),
            password: password.into(),
            timeout: Duration::from_secs(300),
        }
    }

    /// URL of a file in the archive.
    pub fn file_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), file_name)
    }
}

/// Download error types.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("login failed: {0}")]
    Login(String),

    #[error("server returned {status} for {url}")]
    Server { status: u16, url: String },

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to one requested file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Local copy already had the remote size
    AlreadyComplete,
    /// File was (re)downloaded
    Downloaded { bytes: u64 },
}

/// File name of DREAMT subject `number`, e.g. `S008_whole_df.csv`.
pub fn subject_file_name(number: u32) -> String {
    format!("S{number:03}_whole_df.csv")
}

/// Pull the CSRF token out of the login form.
pub fn extract_csrf_token(html: &str) -> Option<String> {
    let line = html.lines().find(|l| l.contains("csrfmiddlewaretoken"))?;
    let start = line.find("value=\"")? + "value=\"".len();
    let end = line[start..].find('"')? + start;
    let token = &line[start..end];
    (!token.is_empty()).then(|| token.to_string())
}

/// Authenticated PhysioNet session.
pub struct PhysioNetClient {
    config: DownloadConfig,
    client: reqwest::blocking::Client,
}

impl PhysioNetClient {
    /// Open a session and log in.
    pub fn login(config: DownloadConfig) -> Result<Self, DownloadError> {
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(config.timeout)
            .build()?;

        let response = client.get(&config.login_url).send()?;
        check_status(&response, &config.login_url)?;
        let page = response.text()?;
        let token = extract_csrf_token(&page)
            .ok_or_else(|| DownloadError::Login("could not find CSRF token".to_string()))?;

        let form = [
            ("username", config.username.as_str()),
            ("password", config.password.as_str()),
            ("csrfmiddlewaretoken", token.as_str()),
            ("next", "/"),
        ];
        let response = client
            .post(&config.login_url)
            .header("Referer", &config.login_url)
            .form(&form)
            .send()?;
        if !response.status().is_success() {
            return Err(DownloadError::Login(format!(
                "login returned status {}",
                response.status().as_u16()
            )));
        }

        info!(user = %config.username, "logged in to PhysioNet");
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Remote size of `url` from a `HEAD` request, if the server reports one.
    pub fn remote_size(&self, url: &str) -> Result<Option<u64>, DownloadError> {
        let response = self.client.head(url).send()?;
        check_status(&response, url)?;
        Ok(response.content_length())
    }

    /// Download subject `number` into `dest_dir`.
    pub fn download_subject(
        &self,
        number: u32,
        dest_dir: &Path,
    ) -> Result<DownloadOutcome, DownloadError> {
        let name = subject_file_name(number);
        self.download_file(&self.config.file_url(&name), &dest_dir.join(&name))
    }

    /// Download `url` to `local_path` unless a complete copy exists.
    ///
    /// Data is streamed in [`CHUNK_SIZE`] chunks into a `.part` file that is
    /// renamed once the transfer finishes.
    pub fn download_file(
        &self,
        url: &str,
        local_path: &Path,
    ) -> Result<DownloadOutcome, DownloadError> {
        if let Ok(meta) = std::fs::metadata(local_path) {
            let remote = self.remote_size(url)?;
            if remote == Some(meta.len()) {
                debug!(path = %local_path.display(), "already complete");
                return Ok(DownloadOutcome::AlreadyComplete);
            }
            warn!(
                path = %local_path.display(),
                local = meta.len(),
                remote = ?remote,
                "incomplete local copy, downloading again"
            );
        }

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DownloadError::Io { path, source }
        };

        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let mut response = self.client.get(url).send()?;
        check_status(&response, url)?;
        let total = response.content_length();

        let part_path = part_path(local_path);
        let file = std::fs::File::create(&part_path).map_err(io_err(&part_path))?;
        let mut writer = std::io::BufWriter::with_capacity(CHUNK_SIZE, file);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes = 0u64;
        loop {
            let n = response.read(&mut buf).map_err(io_err(&part_path))?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(io_err(&part_path))?;
            bytes += n as u64;
            debug!(url, bytes, total = ?total, "chunk received");
        }
        writer.flush().map_err(io_err(&part_path))?;
        drop(writer);

        std::fs::rename(&part_path, local_path).map_err(io_err(local_path))?;
        info!(path = %local_path.display(), bytes, "downloaded");
        Ok(DownloadOutcome::Downloaded { bytes })
    }
}

fn check_status(response: &reqwest::blocking::Response, url: &str) -> Result<(), DownloadError> {
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Server {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_file_name() {
        assert_eq!(subject_file_name(8), "S008_whole_df.csv");
        assert_eq!(subject_file_name(102), "S102_whole_df.csv");
    }

    #[test]
    fn test_file_url() {
        let config = DownloadConfig::new("user", "secret");
        assert_eq!(
            config.file_url("S008_whole_df.csv"),
            "https://physionet.org/files/dreamt/2.0.0/data_64Hz/S008_whole_df.csv"
        );
    }

    #[test]
    fn test_extract_csrf_token() {
        let html = r#"<form method="post">
            <input type="hidden" name="csrfmiddlewaretoken" value="abc123XYZ">
            <input type="text" name="username">
        </form>"#;
        assert_eq!(extract_csrf_token(html), Some("abc123XYZ".to_string()));
        assert_eq!(extract_csrf_token("<form></form>"), None);
        assert_eq!(
            extract_csrf_token(r#"<input name="csrfmiddlewaretoken" value="">"#),
            None
        );
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("data/S008_whole_df.csv")),
            PathBuf::from("data/S008_whole_df.csv.part")
        );
    }
}
