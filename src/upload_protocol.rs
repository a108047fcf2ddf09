//! Image upload to the UART bootloader.
//!
//! The bootloader waits for a trigger byte, then receives a fixed-size
//! program image in chunks, acknowledging each chunk with a single byte. The
//! upload is fail-fast: a chunk that is not acknowledged in time aborts the
//! whole upload, and nothing is ever sent twice.
//!
//! **Example** - Uploading an image with the default device profile:
//! ```no_run
//! use rvboot::{SettingsBuilder, UploadSession};
//!
//! let settings = SettingsBuilder::new("firmware.bin", "/dev/ttyUSB0").finalize();
//! match UploadSession::new(settings).run() {
//!     Ok(report) => println!("{} chunks uploaded", report.chunks),
//!     Err(e) => eprintln!("upload failed: {}", e),
//! }
//! ```

mod events;
mod state_machine;
mod states;

use std::fmt;

use log::debug;

use crate::{
    utils::{Connector, SerialConnector},
    DeviceProfile, Settings, SettingsBuilder, UploadError,
};

use state_machine::{run_to_completion, Terminal};

// =============================================================================
// Public Interface
// =============================================================================

/// What an upload achieved.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct UploadReport {
    /// Size of the image file.
    pub source_size: usize,
    /// Zero bytes appended to reach the device memory size.
    pub padding: usize,
    /// Bytes written to the device, trigger excluded.
    pub bytes_sent: usize,
    /// Chunks acknowledged by the device.
    pub chunks: usize,
}

/// Receives notifications as an upload makes progress. Every method has an
/// empty default implementation.
pub trait ProgressObserver {
    /// The image was read, `size` bytes.
    fn image_loaded(&mut self, _size: usize) {}
    /// `padding` zero bytes were appended to the image, now `total` bytes.
    fn image_padded(&mut self, _padding: usize, _total: usize) {}
    fn channel_opened(&mut self, _path: &str, _baud_rate: u32) {}
    fn trigger_sent(&mut self) {}
    /// About to push `total` bytes in `chunks` chunks.
    fn upload_started(&mut self, _total: usize, _chunks: usize) {}
    /// Chunk `index` was acknowledged; `offset` bytes are now on the device.
    fn chunk_acknowledged(&mut self, _index: usize, _offset: usize) {}
    fn upload_finished(&mut self, _report: &UploadReport) {}
    fn upload_failed(&mut self, _error: &UploadError) {}
}

/// A [`ProgressObserver`] ignoring everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;
impl ProgressObserver for Silent {}

/// One upload of an image to a device. Consumed by [`run`](Self::run).
#[derive(Debug)]
pub struct UploadSession {
    ctx: Context,
}
impl UploadSession {
    /// Upload as described by `settings` over a serial port, with the default
    /// [`DeviceProfile`] and no progress reporting.
    pub fn new(settings: Settings) -> Self {
        UploadSession {
            ctx: Context {
                settings,
                profile: DeviceProfile::default(),
                connector: Box::new(SerialConnector),
                observer: Box::new(Silent),
            },
        }
    }

    /// Use another device profile.
    pub fn profile(mut self, profile: DeviceProfile) -> Self {
        self.ctx.profile = profile;
        self
    }

    /// Open the channel with `connector` instead of a serial port.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.ctx.connector = Box::new(connector);
        self
    }

    /// Report progress to `observer`.
    pub fn observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.ctx.observer = Box::new(observer);
        self
    }

    /// Runs the upload to its end. The channel is closed when this returns,
    /// whatever the outcome.
    pub fn run(self) -> Result<UploadReport, UploadError> {
        debug!("uploading with {:?}", self.ctx.profile);
        match run_to_completion(self.ctx) {
            Terminal::Done(mut sm) => {
                debug!("=> Done: {:?}", sm.state.report);
                sm.ctx.observer.upload_finished(&sm.state.report);
                Ok(sm.state.report)
            }
            Terminal::Aborted(mut sm) => {
                debug!("=> Aborted: {}", sm.state.error);
                sm.ctx.observer.upload_failed(&sm.state.error);
                Err(sm.state.error)
            }
        }
    }
}

/// Uploads the image at `image` to the bootloader listening on the serial
/// port `device`, with the default [`DeviceProfile`], `8N1` and no flow
/// control.
pub fn upload(image: &str, device: &str, baud_rate: u32) -> Result<UploadReport, UploadError> {
    let settings = SettingsBuilder::new(image, device)
        .baud_rate(baud_rate)
        .finalize();
    UploadSession::new(settings).run()
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Data shared by all the states of an upload.
pub(crate) struct Context {
    pub settings: Settings,
    pub profile: DeviceProfile,
    pub connector: Box<dyn Connector>,
    pub observer: Box<dyn ProgressObserver>,
}
impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings)
            .field("profile", &self.profile)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::VecDeque,
        fs,
        io::{self, Write},
        path::PathBuf,
        rc::Rc,
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::utils::Channel;

    const ACK: u8 = b'.';

    /// What the device side saw.
    #[derive(Debug, Default)]
    struct Wire {
        written: Vec<u8>,
        discards: usize,
        connects: usize,
        closed: bool,
    }

    /// Replies of the device to the chunk with the given index.
    type Responder = Box<dyn FnMut(usize) -> Vec<u8>>;

    /// A device that answers every flush after the trigger with whatever the
    /// responder returns for that chunk.
    struct ScriptedChannel {
        wire: Rc<RefCell<Wire>>,
        pending: VecDeque<u8>,
        flushes: usize,
        respond: Responder,
        broken: bool,
        /// Junk bytes still to come, one per read once the input is empty.
        trickle: usize,
    }
    impl Write for ScriptedChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.wire.borrow_mut().written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            // The first flush is the one of the trigger byte.
            if self.flushes > 0 {
                let reply = (self.respond)(self.flushes - 1);
                self.pending.extend(reply);
            }
            self.flushes += 1;
            Ok(())
        }
    }
    impl Channel for ScriptedChannel {
        fn discard_input(&mut self) -> io::Result<()> {
            self.pending.clear();
            self.wire.borrow_mut().discards += 1;
            Ok(())
        }

        fn read_byte(&mut self, wait: Duration) -> io::Result<Option<u8>> {
            match self.pending.pop_front() {
                Some(byte) => Ok(Some(byte)),
                None => {
                    thread::sleep(wait);
                    if self.trickle > 0 {
                        self.trickle -= 1;
                        return Ok(Some(b'x'));
                    }
                    Ok(None)
                }
            }
        }
    }
    impl Drop for ScriptedChannel {
        fn drop(&mut self) {
            self.wire.borrow_mut().closed = true;
        }
    }

    struct ScriptedConnector {
        channel: Option<ScriptedChannel>,
        wire: Rc<RefCell<Wire>>,
    }
    impl Connector for ScriptedConnector {
        fn connect(&mut self, settings: &Settings) -> Result<Box<dyn Channel>, UploadError> {
            self.wire.borrow_mut().connects += 1;
            match self.channel.take() {
                Some(channel) => Ok(Box::new(channel)),
                None => Err(UploadError::ChannelOpen {
                    path: settings.path.clone(),
                    baud_rate: settings.baud_rate,
                    source: serialport::Error::new(
                        serialport::ErrorKind::NoDevice,
                        "no such device",
                    ),
                }),
            }
        }
    }

    fn device(stale: &[u8], respond: Responder) -> (ScriptedConnector, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let channel = ScriptedChannel {
            wire: wire.clone(),
            pending: stale.iter().cloned().collect(),
            flushes: 0,
            respond,
            broken: false,
            trickle: 0,
        };
        let connector = ScriptedConnector {
            channel: Some(channel),
            wire: wire.clone(),
        };
        (connector, wire)
    }

    fn unplugged() -> (ScriptedConnector, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let connector = ScriptedConnector {
            channel: None,
            wire: wire.clone(),
        };
        (connector, wire)
    }

    /// Records notifications in the order they come.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Rc<RefCell<Vec<String>>>,
    }
    impl ProgressObserver for Recorder {
        fn image_loaded(&mut self, size: usize) {
            self.seen.borrow_mut().push(format!("loaded {}", size));
        }
        fn image_padded(&mut self, padding: usize, total: usize) {
            self.seen
                .borrow_mut()
                .push(format!("padded {} to {}", padding, total));
        }
        fn channel_opened(&mut self, path: &str, baud_rate: u32) {
            self.seen
                .borrow_mut()
                .push(format!("opened {} {}", path, baud_rate));
        }
        fn trigger_sent(&mut self) {
            self.seen.borrow_mut().push("trigger".into());
        }
        fn upload_started(&mut self, total: usize, chunks: usize) {
            self.seen
                .borrow_mut()
                .push(format!("started {} {}", total, chunks));
        }
        fn chunk_acknowledged(&mut self, index: usize, offset: usize) {
            self.seen
                .borrow_mut()
                .push(format!("ack {} {}", index, offset));
        }
        fn upload_finished(&mut self, report: &UploadReport) {
            self.seen
                .borrow_mut()
                .push(format!("finished {}", report.chunks));
        }
        fn upload_failed(&mut self, error: &UploadError) {
            self.seen.borrow_mut().push(format!("failed {:?}", error.offset()));
        }
    }
    impl Recorder {
        fn count(&self, prefix: &str) -> usize {
            self.seen
                .borrow()
                .iter()
                .filter(|s| s.starts_with(prefix))
                .count()
        }
    }

    /// A temporary image file removed when dropped.
    struct Image {
        path: PathBuf,
        data: Vec<u8>,
    }
    impl Image {
        fn new(name: &str, len: usize) -> Self {
            let path = std::env::temp_dir().join(format!(
                "rvboot-{}-{}.bin",
                name,
                std::process::id()
            ));
            let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8 + 1).collect();
            fs::write(&path, &data).unwrap();
            Image { path, data }
        }

        fn settings(&self) -> Settings {
            SettingsBuilder::new(self.path.to_str().unwrap(), "/dev/ttyTEST0").finalize()
        }

        fn padded(&self, target: usize) -> Vec<u8> {
            let mut padded = self.data.clone();
            if padded.len() < target {
                padded.resize(target, 0);
            }
            padded
        }
    }
    impl Drop for Image {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn quick_profile() -> DeviceProfile {
        DeviceProfile::default()
            .with_ack_timeout(Duration::from_millis(150))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn always_ack() -> Responder {
        Box::new(|_| vec![ACK])
    }

    fn ack_until(chunk: usize) -> Responder {
        Box::new(move |index| if index < chunk { vec![ACK] } else { vec![] })
    }

    #[test]
    fn full_upload() {
        let image = Image::new("full", 5000);
        let (connector, wire) = device(&[], always_ack());
        let recorder = Recorder::default();

        let report = UploadSession::new(image.settings())
            .profile(quick_profile())
            .connector(connector)
            .observer(recorder.clone())
            .run()
            .unwrap();

        assert_eq!(
            report,
            UploadReport {
                source_size: 5000,
                padding: 16384 - 5000,
                bytes_sent: 16384,
                chunks: 16,
            }
        );

        let wire = wire.borrow();
        assert_eq!(wire.connects, 1);
        assert_eq!(wire.discards, 1);
        assert!(wire.closed);
        assert_eq!(wire.written[0], b'R');
        assert_eq!(&wire.written[1..], &image.padded(16384)[..]);

        assert_eq!(recorder.count("ack "), 16);
        assert_eq!(recorder.count("finished 16"), 1);
        assert_eq!(recorder.count("failed"), 0);
    }

    #[test]
    fn notifications_in_order() {
        let image = Image::new("notify", 3000);
        let (connector, _wire) = device(&[], always_ack());
        let recorder = Recorder::default();
        let profile = quick_profile().with_target_size(4096);

        UploadSession::new(image.settings())
            .profile(profile)
            .connector(connector)
            .observer(recorder.clone())
            .run()
            .unwrap();

        assert_eq!(
            *recorder.seen.borrow(),
            [
                "loaded 3000",
                "padded 1096 to 4096",
                "opened /dev/ttyTEST0 115200",
                "trigger",
                "started 4096 4",
                "ack 0 1024",
                "ack 1 2048",
                "ack 2 3072",
                "ack 3 4096",
                "finished 4",
            ]
        );
    }

    #[test]
    fn timeout_aborts_whole_upload() {
        let image = Image::new("timeout", 16384);
        let (connector, wire) = device(&[], ack_until(2));
        let recorder = Recorder::default();

        let started = Instant::now();
        let err = UploadSession::new(image.settings())
            .profile(quick_profile())
            .connector(connector)
            .observer(recorder.clone())
            .run()
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(150));
        match err {
            UploadError::ChunkTimeout { offset, chunk } => {
                assert_eq!(offset, 3 * 1024);
                assert_eq!(chunk, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }

        // Trigger plus chunks 0, 1 and 2, and not a byte of chunk 3.
        let wire = wire.borrow();
        assert_eq!(wire.written.len(), 1 + 3 * 1024);
        assert_eq!(&wire.written[1..], &image.data[..3 * 1024]);
        assert!(wire.closed);

        assert_eq!(recorder.count("ack "), 2);
        assert_eq!(recorder.count("failed Some(3072)"), 1);
    }

    #[test]
    fn default_timeout_is_five_seconds() {
        let image = Image::new("timeout-default", 100);
        let (connector, wire) = device(&[], ack_until(2));

        let started = Instant::now();
        let err = UploadSession::new(image.settings())
            .connector(connector)
            .run()
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.offset(), Some(3072));
        assert!(elapsed >= Duration::from_secs(5), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(8), "{:?}", elapsed);
        assert_eq!(wire.borrow().written.len(), 1 + 3072);
    }

    #[test]
    fn stray_bytes_are_ignored() {
        let image = Image::new("stray", 16384);
        let (connector, wire) = device(&[], Box::new(|_| b"#R\x00.".to_vec()));
        let recorder = Recorder::default();

        let report = UploadSession::new(image.settings())
            .profile(quick_profile())
            .connector(connector)
            .observer(recorder.clone())
            .run()
            .unwrap();

        assert_eq!(report.chunks, 16);
        assert_eq!(recorder.count("ack "), 16);
        assert_eq!(&wire.borrow().written[1..], &image.data[..]);
    }

    #[test]
    fn stray_bytes_are_not_an_acknowledgment() {
        let image = Image::new("stray-only", 2048);
        let responder: Responder = Box::new(|index| {
            if index == 0 {
                b"x.".to_vec()
            } else {
                b"xyz,;:".to_vec()
            }
        });
        let (connector, wire) = device(&[], responder);

        let started = Instant::now();
        let err = UploadSession::new(image.settings())
            .profile(quick_profile())
            .connector(connector)
            .run()
            .unwrap_err();

        // The clock keeps running while junk comes in.
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(err.offset(), Some(2048));
        assert_eq!(wire.borrow().written.len(), 1 + 2048);
    }

    #[test]
    fn stray_bytes_do_not_extend_the_wait() {
        let image = Image::new("trickle", 1024);
        let (mut connector, wire) = device(&[], Box::new(|_| vec![]));
        // Junk keeps coming in for three times the ack timeout.
        if let Some(channel) = connector.channel.as_mut() {
            channel.trickle = 120;
        }
        let profile = DeviceProfile::default()
            .with_ack_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(5));

        let started = Instant::now();
        let err = UploadSession::new(image.settings())
            .profile(profile)
            .connector(connector)
            .run()
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, UploadError::ChunkTimeout { offset: 1024, chunk: 0 }));
        assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300), "{:?}", elapsed);
        assert_eq!(wire.borrow().written.len(), 1 + 1024);
    }

    #[test]
    fn stale_input_is_discarded() {
        let image = Image::new("stale", 1024);
        let (connector, wire) = device(b"...", Box::new(|_| vec![]));

        let err = UploadSession::new(image.settings())
            .profile(quick_profile())
            .connector(connector)
            .run()
            .unwrap_err();

        assert_eq!(err.offset(), Some(1024));
        let wire = wire.borrow();
        assert_eq!(wire.discards, 1);
        assert_eq!(wire.written.len(), 1 + 1024);
        assert!(wire.closed);
    }

    #[test]
    fn oversize_image_is_sent_as_is() {
        let image = Image::new("oversize", 17000);
        let (connector, wire) = device(&[], always_ack());

        let report = UploadSession::new(image.settings())
            .profile(quick_profile())
            .connector(connector)
            .run()
            .unwrap();

        assert_eq!(report.padding, 0);
        assert_eq!(report.bytes_sent, 17000);
        assert_eq!(report.chunks, 17);
        assert_eq!(&wire.borrow().written[1..], &image.data[..]);
    }

    #[test]
    fn custom_profile() {
        let image = Image::new("profile", 300);
        let (connector, wire) = device(&[], Box::new(|_| vec![b'+']));
        let profile = quick_profile()
            .with_chunk_size(256)
            .with_target_size(1000)
            .with_ack_byte(b'+')
            .with_trigger_byte(b'U');

        let report = UploadSession::new(image.settings())
            .profile(profile)
            .connector(connector)
            .run()
            .unwrap();

        assert_eq!(report.chunks, 4);
        assert_eq!(report.bytes_sent, 1000);
        let wire = wire.borrow();
        assert_eq!(wire.written[0], b'U');
        assert_eq!(&wire.written[1..], &image.padded(1000)[..]);
    }

    #[test]
    fn port_that_cannot_be_opened() {
        let image = Image::new("unplugged", 10);
        let (connector, wire) = unplugged();
        let recorder = Recorder::default();

        let err = UploadSession::new(image.settings())
            .connector(connector)
            .observer(recorder.clone())
            .run()
            .unwrap_err();

        assert!(matches!(err, UploadError::ChannelOpen { .. }));
        assert_eq!(wire.borrow().connects, 1);
        assert_eq!(recorder.count("opened"), 0);
        assert_eq!(recorder.count("trigger"), 0);
        assert_eq!(recorder.count("failed None"), 1);
    }

    #[test]
    fn missing_image_never_opens_the_port() {
        let (connector, wire) = device(&[], always_ack());
        let settings =
            SettingsBuilder::new("no/such/image.bin", "/dev/ttyTEST0").finalize();

        let err = UploadSession::new(settings)
            .connector(connector)
            .run()
            .unwrap_err();

        assert!(matches!(err, UploadError::SourceNotFound { .. }));
        assert_eq!(wire.borrow().connects, 0);
    }

    #[test]
    fn write_failure_closes_the_port() {
        let image = Image::new("broken", 10);
        let (mut connector, wire) = device(&[], always_ack());
        if let Some(channel) = connector.channel.as_mut() {
            channel.broken = true;
        }

        let err = UploadSession::new(image.settings())
            .profile(quick_profile())
            .connector(connector)
            .run()
            .unwrap_err();

        assert!(matches!(err, UploadError::Channel(_)));
        let wire = wire.borrow();
        assert!(wire.written.is_empty());
        assert!(wire.closed);
    }
}
