//! Upload flow: resolves settings, drives one [`UploadSession`] and keeps
//! the checkpoint file in sync with the outcome.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hugeup_transfer::{ProgressFn, digest_file};
use hugeup_uploader::{
    Checkpoint, CompleteUploadResponse, EventKind, FileHandle, HttpTransport,
    HttpTransportConfig, LocalFile, SessionConfig, UploadEvent, UploadSession,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cli::Args;
use crate::config::Config;

/// Merges the config file with command-line overrides.
fn resolve(args: &Args, config: &Config) -> anyhow::Result<(SessionConfig, HttpTransportConfig)> {
    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| config.endpoint.clone());
    if endpoint.trim().is_empty() {
        anyhow::bail!("no endpoint: pass --endpoint or set `endpoint` in the config file");
    }

    let mut extra_fields = config.extra_fields_json()?;
    for (key, value) in &args.fields {
        extra_fields.insert(key.clone(), Value::String(value.clone()));
    }

    let mut headers = config.headers.clone();
    headers.extend(args.headers.iter().cloned());

    let session = SessionConfig {
        endpoint: endpoint.clone(),
        chunk_size: args.chunk_size.unwrap_or(config.chunk_size),
        retries: args.retries.unwrap_or(config.retries),
        retry_delay: Duration::from_secs(args.retry_delay.unwrap_or(config.retry_delay_secs)),
        digest: args.md5.clone().unwrap_or_default(),
        extra_fields,
    };
    let transport = HttpTransportConfig {
        endpoint,
        headers,
        timeout: Duration::from_secs(config.timeout_secs),
    };
    Ok((session, transport))
}

/// Uploads `args.file`. Prints the final storage location on success.
pub async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let (mut session_config, transport_config) = resolve(&args, &config)?;

    let file: Arc<dyn FileHandle> = Arc::new(
        LocalFile::open(&args.file)
            .with_context(|| format!("cannot open {}", args.file.display()))?,
    );
    if session_config.digest.is_empty() {
        session_config.digest = compute_digest(Arc::clone(&file)).await?;
    }

    let transport = HttpTransport::new(&transport_config)?;
    let checkpoint = match &args.checkpoint {
        Some(path) => load_checkpoint(path)?,
        None => None,
    };
    let session = Arc::new(match checkpoint {
        Some(checkpoint) => {
            info!(
                upload_id = %checkpoint.upload_id,
                acknowledged = checkpoint.acknowledgements.len(),
                "resuming from checkpoint"
            );
            UploadSession::from_checkpoint(file, transport, session_config, checkpoint)?
        }
        None => UploadSession::new(file, transport, session_config)?,
    });
    log_events(&session);

    let mut task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.start().await })
    };

    tokio::select! {
        joined = &mut task => {
            match joined.context("upload task failed")? {
                Ok(response) => {
                    if let Some(path) = &args.checkpoint {
                        remove_checkpoint(path)?;
                    }
                    println!("{}", location_or_body(&response));
                    Ok(())
                }
                Err(err) => {
                    if let (Some(path), Some(checkpoint)) = (&args.checkpoint, session.checkpoint()) {
                        save_checkpoint(path, &checkpoint)?;
                    }
                    Err(anyhow::Error::new(err)
                        .context(format!("upload of {} failed", args.file.display())))
                }
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for Ctrl-C")?;
            session.pause();
            task.abort();

            match (&args.checkpoint, session.checkpoint()) {
                (Some(path), Some(checkpoint)) => {
                    save_checkpoint(path, &checkpoint)?;
                    info!(path = %path.display(), "upload interrupted, rerun with the same --checkpoint to resume");
                }
                (None, Some(checkpoint)) => {
                    warn!(upload_id = %checkpoint.upload_id, "upload interrupted without --checkpoint, progress is not saved");
                }
                (_, None) => info!("upload interrupted before initialization"),
            }
            Ok(())
        }
    }
}

async fn compute_digest(file: Arc<dyn FileHandle>) -> anyhow::Result<String> {
    info!(file = %file.name(), bytes = file.len(), "generating MD5 hash");

    let digest = tokio::task::spawn_blocking(move || {
        let mut reported = 0u32;
        let progress: ProgressFn = Box::new(move |fraction| {
            let percent = (fraction * 100.0) as u32;
            if percent >= reported + 10 || (percent == 100 && reported < 100) {
                reported = percent;
                debug!(percent, "hashing");
            }
        });
        digest_file(file.as_ref(), 0, Some(progress))
    })
    .await
    .context("digest task failed")??;

    Ok(digest)
}

fn log_events(session: &UploadSession) {
    session.on(EventKind::Progress, |event| {
        if let UploadEvent::Progress(percent) = event {
            info!(percent = *percent, "upload progress");
        }
    });
    session.on(EventKind::FileRetry, |event| {
        if let UploadEvent::FileRetry(notice) = event {
            warn!("{}", notice.message);
        }
    });
    session.on(EventKind::Error, |event| {
        if let UploadEvent::Error(report) = event {
            warn!(status = ?report.status, chunk = ?report.chunk_index, "{}", report.message);
        }
    });
    session.on(EventKind::Offline, |_| warn!("offline, upload halted"));
    session.on(EventKind::Online, |_| info!("online, upload continues"));
    session.on(EventKind::Finish, |_| debug!("upload finished"));
}

fn location_or_body(response: &CompleteUploadResponse) -> String {
    response
        .location()
        .map(str::to_string)
        .unwrap_or_else(|| response.body().to_string())
}

fn load_checkpoint(path: &Path) -> anyhow::Result<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read checkpoint {}", path.display()))?;
    let checkpoint = serde_json::from_str(&content)
        .with_context(|| format!("invalid checkpoint {}", path.display()))?;
    Ok(Some(checkpoint))
}

fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(checkpoint)?;
    std::fs::write(path, content)
        .with_context(|| format!("cannot write checkpoint {}", path.display()))?;
    debug!(
        path = %path.display(),
        acknowledged = checkpoint.acknowledgements.len(),
        "checkpoint saved"
    );
    Ok(())
}

fn remove_checkpoint(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "checkpoint removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("cannot remove checkpoint {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("hugeup").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_line_overrides_config() {
        let mut config = Config {
            endpoint: "https://config.example.com".into(),
            retries: 7,
            ..Config::default()
        };
        config
            .headers
            .insert("Authorization".into(), "Bearer old".into());
        config
            .extra_fields
            .insert("channel_id".into(), toml::Value::String("1".into()));
        config
            .extra_fields
            .insert("public".into(), toml::Value::Boolean(true));

        let args = parse(&[
            "movie.mp4",
            "--endpoint",
            "https://cli.example.com",
            "--header",
            "Authorization=Bearer new",
            "--field",
            "channel_id=2",
            "--retry-delay",
            "1",
        ]);

        let (session, transport) = resolve(&args, &config).unwrap();
        assert_eq!(session.endpoint, "https://cli.example.com");
        assert_eq!(session.retries, 7);
        assert_eq!(session.retry_delay, Duration::from_secs(1));
        assert_eq!(session.extra_fields["channel_id"], "2");
        assert_eq!(session.extra_fields["public"], true);
        assert!(session.digest.is_empty());
        assert_eq!(transport.headers["Authorization"], "Bearer new");
        assert_eq!(transport.timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        let args = parse(&["movie.mp4"]);
        assert!(resolve(&args, &Config::default()).is_err());
    }

    #[test]
    fn checkpoint_file_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("movie.json");
        assert!(load_checkpoint(&path).unwrap().is_none());

        let checkpoint = Checkpoint {
            upload_id: "up-7".into(),
            acknowledgements: vec!["e0".into()],
        };
        save_checkpoint(&path, &checkpoint).unwrap();
        assert_eq!(load_checkpoint(&path).unwrap(), Some(checkpoint));

        remove_checkpoint(&path).unwrap();
        assert!(!path.exists());
        remove_checkpoint(&path).unwrap();
    }

    #[test]
    fn every_event_kind_is_logged() {
        let file = Arc::new(hugeup_uploader::InMemoryFile::new("a.bin", vec![0; 8]));
        let transport = HttpTransport::new(&HttpTransportConfig::new("http://127.0.0.1:9")).unwrap();
        let config = SessionConfig {
            endpoint: "http://127.0.0.1:9".into(),
            digest: "0".repeat(32),
            ..SessionConfig::default()
        };
        let session = UploadSession::new(file, transport, config).unwrap();

        log_events(&session);
        for kind in EventKind::ALL {
            assert_eq!(session.events().subscriber_count(kind), 1, "{kind}");
        }
    }

    #[test]
    fn location_falls_back_to_body() {
        let with = CompleteUploadResponse(serde_json::json!({"data": {"file_path": "/m/x"}}));
        assert_eq!(location_or_body(&with), "/m/x");

        let without = CompleteUploadResponse(serde_json::json!({"ok": true}));
        assert_eq!(location_or_body(&without), r#"{"ok":true}"#);
    }

    // -- End-to-end against a mock API --------------------------------------

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 8192];
        loop {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);

            let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn chunk_number(request: &str) -> String {
        let marker = "name=\"chunk_number\"\r\n\r\n";
        let start = request.find(marker).unwrap() + marker.len();
        let rest = &request[start..];
        rest[..rest.find("\r\n").unwrap()].to_string()
    }

    /// Serves `requests` API calls; chunk uploads answer `chunk_status`.
    /// Yields each request's path and body.
    async fn mock_api(
        chunk_status: u16,
        requests: usize,
    ) -> (String, tokio::task::JoinHandle<Vec<(String, String)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..requests {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                let path = request.split(' ').nth(1).unwrap().to_string();
                let body = request[request.find("\r\n\r\n").unwrap() + 4..].to_string();

                let (status, reply) = if path.ends_with("/init_upload") {
                    (200, r#"{"data":{"upload_id":"up-7"}}"#.to_string())
                } else if path.ends_with("/upload_chunk") {
                    if chunk_status == 200 {
                        let n = chunk_number(&request);
                        (200, format!(r#"{{"data":{{"etag":"etag-{n}"}}}}"#))
                    } else {
                        (chunk_status, r#"{"error":"denied"}"#.to_string())
                    }
                } else {
                    (200, r#"{"data":{"file_path":"/media/movie.bin"}}"#.to_string())
                };

                let resp = format!(
                    "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                    reply.len()
                );
                stream.write_all(resp.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
                seen.push((path, body));
            }
            seen
        });

        (format!("http://127.0.0.1:{port}/api/media"), handle)
    }

    #[tokio::test]
    async fn resumes_from_checkpoint_and_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("movie.bin");
        std::fs::write(&file, b"0123456789").unwrap();
        let checkpoint = tmp.path().join("movie.json");
        save_checkpoint(
            &checkpoint,
            &Checkpoint {
                upload_id: "up-7".into(),
                acknowledgements: vec!["etag-0".into()],
            },
        )
        .unwrap();

        let (endpoint, server) = mock_api(200, 3).await;
        let args = parse(&[
            file.to_str().unwrap(),
            "--endpoint",
            &endpoint,
            "--chunk-size",
            "4",
            "--checkpoint",
            checkpoint.to_str().unwrap(),
        ]);

        run(args, Config::default()).await.unwrap();

        let seen = server.await.unwrap();
        let paths: Vec<&str> = seen.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/api/media/upload_chunk",
                "/api/media/upload_chunk",
                "/api/media/complete_upload"
            ]
        );
        assert!(seen[0].1.contains("name=\"chunk_number\"\r\n\r\n1\r\n"));
        assert!(seen[0].1.contains("name=\"upload_id\"\r\n\r\nup-7\r\n"));
        assert_eq!(
            seen[2].1,
            r#"{"upload_id":"up-7","etags":["etag-0","etag-1","etag-2"]}"#
        );
        assert!(!checkpoint.exists());
    }

    #[tokio::test]
    async fn failure_saves_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("movie.bin");
        std::fs::write(&file, b"0123456789").unwrap();
        let checkpoint = tmp.path().join("movie.json");

        let (endpoint, server) = mock_api(403, 2).await;
        let args = parse(&[
            file.to_str().unwrap(),
            "--endpoint",
            &endpoint,
            "--md5",
            "781e5e245d69b566979b86e28d23f2c7",
            "--field",
            "channel_id=42",
            "--checkpoint",
            checkpoint.to_str().unwrap(),
        ]);

        let err = run(args, Config::default()).await.unwrap_err();
        assert!(format!("{err:#}").contains("HTTP 403"));

        let seen = server.await.unwrap();
        let init: Value = serde_json::from_str(&seen[0].1).unwrap();
        assert_eq!(init["md5"], "781e5e245d69b566979b86e28d23f2c7");
        assert_eq!(init["channel_id"], "42");
        assert_eq!(init["chunk_count"], 1);

        let saved = load_checkpoint(&checkpoint).unwrap().unwrap();
        assert_eq!(saved.upload_id, "up-7");
        assert!(saved.acknowledgements.is_empty());
    }
}
