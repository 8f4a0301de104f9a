use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crate::net::{FILE_CHUNK_SIZE, FileMessage};

pub trait PacketSink: Send + Sync + 'static {
    fn send_packet(&self, bytes: Vec<u8>) -> io::Result<()>;
}

pub fn executable_dir() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.display().to_string()))
        .unwrap_or_default()
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        100.0
    } else {
        (done.min(total) as f64 * 100.0 / total as f64) as f32
    }
}

#[derive(Debug, Default)]
struct Progress {
    sent: AtomicU64,
    total: AtomicU64,
    complete: AtomicBool,
    failed: AtomicBool,
    cancelled: AtomicBool,
}

pub struct FileTransfer {
    name: String,
    progress: Arc<Progress>,
    handle: Option<JoinHandle<()>>,
}

impl FileTransfer {
    pub fn start(path: impl Into<PathBuf>, sink: Arc<dyn PacketSink>) -> io::Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no file name"))?;
        let progress = Arc::new(Progress::default());

        let handle = thread::Builder::new()
            .name(format!("file-{name}"))
            .spawn({
                let name = name.clone();
                let progress = progress.clone();
                move || match stream_file(&path, &name, &progress, sink.as_ref()) {
                    Ok(()) => {
                        progress.complete.store(true, Ordering::SeqCst);
                        log::info!("Sent file {name}");
                    }
                    Err(e) => {
                        progress.failed.store(true, Ordering::SeqCst);
                        log::warn!("File transfer of {name} failed: {e}");
                        let abort = FileMessage::Chunk {
                            name,
                            failed: true,
                            bytes: Vec::new(),
                        };
                        let _ = sink.send_packet(abort.encode());
                    }
                }
            })?;

        Ok(Self {
            name,
            progress,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn completion(&self) -> f32 {
        percent(
            self.progress.sent.load(Ordering::SeqCst),
            self.progress.total.load(Ordering::SeqCst),
        )
    }

    pub fn is_complete(&self) -> bool {
        self.progress.complete.load(Ordering::SeqCst)
    }

    pub fn has_failed(&self) -> bool {
        self.progress.failed.load(Ordering::SeqCst)
    }

    pub fn is_transferring(&self) -> bool {
        !self.is_complete() && !self.has_failed()
    }

    pub fn stop(&mut self) {
        self.progress.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileTransfer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_file(path: &Path, name: &str, progress: &Progress, sink: &dyn PacketSink) -> io::Result<()> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let announced = u32::try_from(size)
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "file larger than 4 GiB"))?;
    progress.total.store(size, Ordering::SeqCst);

    let start = FileMessage::Start {
        name: name.to_owned(),
        size: announced,
        origin_path: executable_dir(),
    };
    sink.send_packet(start.encode())?;

    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    loop {
        if progress.cancelled.load(Ordering::SeqCst) {
            return Err(io::Error::new(ErrorKind::Interrupted, "transfer cancelled"));
        }
        let read = file.read(&mut buf)?;
        if read == 0 {
            return Ok(());
        }
        let chunk = FileMessage::Chunk {
            name: name.to_owned(),
            failed: false,
            bytes: buf[..read].to_vec(),
        };
        sink.send_packet(chunk.encode())?;
        progress.sent.fetch_add(read as u64, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveState {
    Receiving,
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    pub name: String,
    pub completion: f32,
    pub complete: bool,
    pub failed: bool,
}

#[derive(Debug)]
pub struct FileReceiver {
    name: String,
    file: Option<File>,
    expected: u64,
    received: u64,
    state: ReceiveState,
}

impl FileReceiver {
    /// Opens `dir/<name>` for writing. Any directory part of the announced
    /// name is dropped.
    pub fn create(dir: &Path, name: &str, size: u32) -> Self {
        let mut receiver = Self {
            name: name.to_owned(),
            file: None,
            expected: u64::from(size),
            received: 0,
            state: ReceiveState::Receiving,
        };

        let Some(file_name) = Path::new(name).file_name() else {
            log::warn!("Refusing file with unusable name {name:?}");
            receiver.state = ReceiveState::Failed;
            return receiver;
        };
        match File::create(dir.join(file_name)) {
            Ok(file) => receiver.file = Some(file),
            Err(e) => {
                log::warn!("Cannot create {name}: {e}");
                receiver.state = ReceiveState::Failed;
            }
        }
        if receiver.expected == 0 && receiver.state == ReceiveState::Receiving {
            receiver.finish();
        }
        receiver
    }

    pub fn skipped(name: &str, size: u32) -> Self {
        Self {
            name: name.to_owned(),
            file: None,
            expected: u64::from(size),
            received: 0,
            state: ReceiveState::Skipped,
        }
    }

    pub fn on_chunk(&mut self, failed: bool, bytes: &[u8]) {
        if failed {
            if self.state != ReceiveState::Complete {
                log::warn!("Sender aborted file {}", self.name);
                self.state = ReceiveState::Failed;
                self.file = None;
            }
            return;
        }

        match self.state {
            ReceiveState::Receiving => {
                let written = match self.file.as_mut() {
                    Some(file) => file.write_all(bytes),
                    None => Err(io::Error::from(ErrorKind::NotConnected)),
                };
                if let Err(e) = written {
                    log::warn!("Writing {} failed: {e}", self.name);
                    self.state = ReceiveState::Failed;
                    self.file = None;
                    return;
                }
                self.received += bytes.len() as u64;
                if self.received >= self.expected {
                    self.finish();
                }
            }
            ReceiveState::Skipped => self.received += bytes.len() as u64,
            ReceiveState::Complete | ReceiveState::Failed => {}
        }
    }

    fn finish(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                log::warn!("Flushing {} failed: {e}", self.name);
                self.state = ReceiveState::Failed;
                return;
            }
        }
        self.state = ReceiveState::Complete;
        log::info!("Received file {} ({} bytes)", self.name, self.received);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn completion(&self) -> f32 {
        match self.state {
            ReceiveState::Complete => 100.0,
            _ => percent(self.received, self.expected),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, ReceiveState::Complete | ReceiveState::Skipped)
    }

    pub fn has_failed(&self) -> bool {
        self.state == ReceiveState::Failed
    }

    pub fn status(&self) -> ReceivedFile {
        ReceivedFile {
            name: self.name.clone(),
            completion: self.completion(),
            complete: self.is_complete(),
            failed: self.has_failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{CommandType, WireReader};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collect {
        packets: Mutex<Vec<Vec<u8>>>,
    }

    impl PacketSink for Collect {
        fn send_packet(&self, bytes: Vec<u8>) -> io::Result<()> {
            self.packets.lock().unwrap().push(bytes);
            Ok(())
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lanplay-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn wait_until(deadline_ms: u64, done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn decode(bytes: &[u8]) -> FileMessage {
        let mut reader = WireReader::new(bytes);
        assert_eq!(CommandType::read(&mut reader).unwrap(), CommandType::File);
        FileMessage::decode(&mut reader).unwrap()
    }

    #[test]
    fn test_transfer_delivers_every_byte() {
        let src_dir = scratch_dir("send");
        let dst_dir = scratch_dir("recv");
        let source = src_dir.join("payload.bin");
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &content).unwrap();

        let sink = Arc::new(Collect::default());
        let transfer = FileTransfer::start(&source, sink.clone()).unwrap();
        assert!(wait_until(2000, || transfer.is_complete()));
        assert_eq!(transfer.completion(), 100.0);

        let packets = sink.packets.lock().unwrap().clone();
        assert_eq!(packets.len(), 1 + 3);

        let mut receiver = match decode(&packets[0]) {
            FileMessage::Start { name, size, .. } => {
                assert_eq!(size, 20_000);
                FileReceiver::create(&dst_dir, &name, size)
            }
            other => panic!("expected start, got {other:?}"),
        };
        for packet in &packets[1..] {
            match decode(packet) {
                FileMessage::Chunk { failed, bytes, .. } => receiver.on_chunk(failed, &bytes),
                other => panic!("expected chunk, got {other:?}"),
            }
        }

        assert!(receiver.is_complete());
        assert_eq!(std::fs::read(dst_dir.join("payload.bin")).unwrap(), content);
    }

    #[test]
    fn test_missing_file_marks_failure() {
        let sink = Arc::new(Collect::default());
        let transfer = FileTransfer::start(scratch_dir("missing").join("nope.bin"), sink.clone()).unwrap();
        assert!(wait_until(2000, || transfer.has_failed()));

        let packets = sink.packets.lock().unwrap().clone();
        assert_eq!(packets.len(), 1);
        assert!(matches!(decode(&packets[0]), FileMessage::Chunk { failed: true, .. }));
    }

    #[test]
    fn test_empty_file_completes_on_start() {
        let receiver = FileReceiver::create(&scratch_dir("empty"), "empty.txt", 0);
        assert!(receiver.is_complete());
        assert_eq!(receiver.completion(), 100.0);
    }

    #[test]
    fn test_receiver_strips_directories() {
        let dir = scratch_dir("strip");
        let mut receiver = FileReceiver::create(&dir, "../../escape.txt", 2);
        receiver.on_chunk(false, b"ok");
        assert!(receiver.is_complete());
        assert!(dir.join("escape.txt").exists());
    }

    #[test]
    fn test_abort_marks_receiver_failed() {
        let mut receiver = FileReceiver::create(&scratch_dir("abort"), "partial.bin", 10);
        receiver.on_chunk(false, &[1, 2, 3]);
        receiver.on_chunk(true, &[]);
        assert!(receiver.has_failed());
        assert!(!receiver.is_complete());
    }

    #[test]
    fn test_skipped_counts_as_complete() {
        let mut receiver = FileReceiver::skipped("shared.bin", 4);
        receiver.on_chunk(false, &[0, 0]);
        assert!(receiver.is_complete());
        assert_eq!(receiver.completion(), 50.0);
    }
}
