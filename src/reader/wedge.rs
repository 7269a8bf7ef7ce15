//! Line-oriented readers: USB keyboard-wedge scanners on stdin, and serial
//! or HID readers exposed as a character device. Each non-empty line is one
//! credential.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CredentialReader, CredentialSink, ReaderError, TagBus};
use crate::api::validation::looks_like_card_uid;
use crate::auth::credential::RawCredential;
use crate::config::ReaderMode;

type LineStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Turn one scanned line into a credential according to the reader mode.
pub fn classify_line(line: &str, mode: ReaderMode) -> Option<RawCredential> {
    let line = line.trim_matches(|c: char| c.is_whitespace() || c.is_control());
    if line.is_empty() {
        return None;
    }
    let credential = match mode {
        ReaderMode::Nfc => RawCredential::card(line),
        ReaderMode::Qr => RawCredential::code(line),
        ReaderMode::Auto if looks_like_card_uid(line) => RawCredential::card(line),
        ReaderMode::Auto => RawCredential::code(line),
    };
    Some(credential)
}

enum Source {
    Stdin,
    Device(PathBuf),
    /// Pre-opened stream, consumed by the first start
    Stream(parking_lot::Mutex<Option<LineStream>>),
}

pub struct WedgeReader {
    source: Source,
    mode: ReaderMode,
    bus: Arc<TagBus>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Set once a non-reopenable source reached end of input
    exhausted: Arc<AtomicBool>,
}

impl WedgeReader {
    fn with_source(source: Source, mode: ReaderMode) -> Self {
        Self {
            source,
            mode,
            bus: Arc::new(TagBus::new(16)),
            pump: Mutex::new(None),
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stdin(mode: ReaderMode) -> Self {
        Self::with_source(Source::Stdin, mode)
    }

    pub fn device(path: PathBuf, mode: ReaderMode) -> Self {
        Self::with_source(Source::Device(path), mode)
    }

    pub fn from_stream<R>(stream: R, mode: ReaderMode) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let lines: LineStream = Box::new(BufReader::new(stream));
        Self::with_source(Source::Stream(parking_lot::Mutex::new(Some(lines))), mode)
    }

    async fn open(&self) -> Result<LineStream, ReaderError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(ReaderError::HardwareUnavailable(
                "reader input is closed".to_string(),
            ));
        }
        match &self.source {
            Source::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
            Source::Device(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    ReaderError::HardwareUnavailable(format!("{}: {}", path.display(), e))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
            Source::Stream(stream) => stream.lock().take().ok_or_else(|| {
                ReaderError::HardwareUnavailable("reader input is closed".to_string())
            }),
        }
    }

    fn reopenable(&self) -> bool {
        matches!(self.source, Source::Device(_))
    }

    async fn ensure_pump(&self) -> Result<(), ReaderError> {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return Ok(());
        }

        let lines = self.open().await?;
        let bus = self.bus.clone();
        let mode = self.mode;
        let exhausted = self.exhausted.clone();
        let reopenable = self.reopenable();
        let name = self.name();

        *pump = Some(tokio::spawn(async move {
            let mut lines = lines.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(credential) = classify_line(&line, mode) {
                            if !bus.publish(credential) {
                                debug!(reader = name, "Credential read while no screen is listening");
                            }
                        }
                    }
                    Ok(None) => {
                        info!(reader = name, "Reader input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(reader = name, error = %e, "Reader read failed");
                        break;
                    }
                }
            }
            if !reopenable {
                exhausted.store(true, Ordering::SeqCst);
            }
        }));
        Ok(())
    }
}

#[async_trait]
impl CredentialReader for WedgeReader {
    fn name(&self) -> &'static str {
        match self.source {
            Source::Stdin => "stdin",
            Source::Device(_) => "device",
            Source::Stream(_) => "stream",
        }
    }

    async fn start(&self, sink: CredentialSink) -> Result<(), ReaderError> {
        self.ensure_pump().await?;
        self.bus.attach(sink);
        debug!(reader = self.name(), "Reader started");
        Ok(())
    }

    async fn stop(&self) {
        self.bus.detach();
        // Release the device while no screen needs it
        if self.reopenable() {
            if let Some(handle) = self.pump.lock().await.take() {
                handle.abort();
            }
        }
        debug!(reader = self.name(), "Reader stopped");
    }

    fn is_active(&self) -> bool {
        self.bus.is_attached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("04A1B2C3\r", ReaderMode::Auto),
            Some(RawCredential::card("04A1B2C3"))
        );
        assert_eq!(
            classify_line("https://host?token=XYZ", ReaderMode::Auto),
            Some(RawCredential::code("https://host?token=XYZ"))
        );
        assert_eq!(
            classify_line("04A1B2C3", ReaderMode::Qr),
            Some(RawCredential::code("04A1B2C3"))
        );
        assert_eq!(
            classify_line("hello", ReaderMode::Nfc),
            Some(RawCredential::card("hello"))
        );
        assert_eq!(classify_line("  \t", ReaderMode::Auto), None);
    }

    #[tokio::test]
    async fn test_stream_lines_reach_subscriber() {
        let (mut writer, stream) = tokio::io::duplex(256);
        let reader = WedgeReader::from_stream(stream, ReaderMode::Auto);
        let (tx, mut rx) = mpsc::channel(8);

        reader.start(tx).await.unwrap();
        assert!(reader.is_active());

        writer.write_all(b"04A1B2C3\n\n{\"id\":\"H1\",\"field\":\"f\",\"itemId\":\"1\"}\n").await.unwrap();

        assert_eq!(rx.recv().await, Some(RawCredential::card("04A1B2C3")));
        assert_eq!(
            rx.recv().await,
            Some(RawCredential::code(r#"{"id":"H1","field":"f","itemId":"1"}"#))
        );
    }

    #[tokio::test]
    async fn test_restart_keeps_single_subscriber() {
        let (mut writer, stream) = tokio::io::duplex(256);
        let reader = WedgeReader::from_stream(stream, ReaderMode::Qr);
        let (first_tx, mut first_rx) = mpsc::channel(8);
        let (second_tx, mut second_rx) = mpsc::channel(8);

        reader.start(first_tx).await.unwrap();
        reader.start(second_tx).await.unwrap();

        writer.write_all(b"XYZ\n").await.unwrap();
        assert_eq!(second_rx.recv().await, Some(RawCredential::code("XYZ")));
        assert_eq!(first_rx.recv().await, None);

        reader.stop().await;
        assert!(!reader.is_active());
        reader.stop().await;
    }

    #[tokio::test]
    async fn test_closed_stream_is_unavailable() {
        let (writer, stream) = tokio::io::duplex(16);
        let reader = WedgeReader::from_stream(stream, ReaderMode::Auto);
        let (tx, _rx) = mpsc::channel(8);
        reader.start(tx).await.unwrap();

        drop(writer);
        // Let the pump observe end of input
        for _ in 0..50 {
            if reader.exhausted.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }

        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            reader.start(tx).await,
            Err(ReaderError::HardwareUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_device() {
        let reader = WedgeReader::device(PathBuf::from("/nonexistent/ttyACM9"), ReaderMode::Auto);
        let (tx, _rx) = mpsc::channel(1);
        let err = reader.start(tx).await.unwrap_err();
        assert!(matches!(err, ReaderError::HardwareUnavailable(_)));
        assert!(err.to_string().contains("ttyACM9"));
        assert!(!reader.is_active());
    }

    #[tokio::test]
    async fn test_device_file_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "04:A1:B2:C3").unwrap();
        file.flush().unwrap();

        let reader = WedgeReader::device(file.path().to_path_buf(), ReaderMode::Nfc);
        let (tx, mut rx) = mpsc::channel(8);
        reader.start(tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(RawCredential::card("04:A1:B2:C3")));
    }
}
