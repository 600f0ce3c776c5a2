//! Continuous microphone forwarding.
//!
//! One outbound audio stream is opened as soon as the session reaches
//! `Connected`. The microphone channel is expected to stay available for
//! the whole session: whenever the remote side closes the active stream,
//! exactly one replacement is opened. Re-arming stops as soon as the
//! session leaves `Connected`, so a refusing remote cannot drive an
//! unbounded open/close loop.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::identifiers::StreamIndex;
use crate::protocol::opcode::AUDIO;
use crate::protocol::Instruction;

use super::codec::StreamTable;

// ============================================================================
// Constants
// ============================================================================

/// Negotiated microphone format: raw PCM, fixed rate and channel count.
pub const AUDIO_INPUT_MIMETYPE: &str = "audio/L16;rate=44100,channels=2";

// ============================================================================
// AudioRecorderFactory
// ============================================================================

/// Host factory for local audio capture.
///
/// Returns a channel of raw sample chunks in the requested format, or
/// `None` when no local recorder supports it.
pub trait AudioRecorderFactory: Send + Sync {
    /// Opens a recorder for `mimetype`.
    fn open(&self, mimetype: &str) -> Option<mpsc::UnboundedReceiver<Vec<u8>>>;
}

/// Factory for hosts without audio capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecorder;

impl AudioRecorderFactory for NoRecorder {
    fn open(&self, _mimetype: &str) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        None
    }
}

// ============================================================================
// AudioInputStreamer
// ============================================================================

/// Keeps one outbound audio stream armed while the session is connected.
pub struct AudioInputStreamer {
    factory: Arc<dyn AudioRecorderFactory>,
    mimetype: String,
    active: Option<StreamIndex>,
    pump: Option<JoinHandle<()>>,
}

impl AudioInputStreamer {
    /// Creates a streamer using the host's recorder factory.
    #[must_use]
    pub fn new(factory: Arc<dyn AudioRecorderFactory>) -> Self {
        Self {
            factory,
            mimetype: AUDIO_INPUT_MIMETYPE.to_string(),
            active: None,
            pump: None,
        }
    }

    /// Returns the index of the active stream, if any.
    #[inline]
    #[must_use]
    pub fn active_index(&self) -> Option<StreamIndex> {
        self.active
    }

    /// Returns `true` if `index` is the active audio stream.
    #[inline]
    #[must_use]
    pub fn owns(&self, index: StreamIndex) -> bool {
        self.active == Some(index)
    }

    /// Opens the outbound audio stream.
    ///
    /// When no local recorder can be constructed for the negotiated
    /// format, the stream is ended immediately rather than left dangling.
    pub fn start(&mut self, table: &mut StreamTable) {
        if self.active.is_some() {
            return;
        }
        let writer = table.open_outbound();
        let index = writer.index();
        let open = Instruction::new(
            AUDIO,
            vec![index.to_string(), self.mimetype.clone()],
        );
        if writer.open(open).is_err() {
            debug!("audio stream open dropped, tunnel closed");
            table.release_outbound(index);
            return;
        }

        let Some(mut source) = self.factory.open(&self.mimetype) else {
            warn!(mimetype = %self.mimetype, "no local recorder, closing audio stream");
            let _ = writer.finish();
            table.release_outbound(index);
            return;
        };

        debug!(%index, mimetype = %self.mimetype, "audio input stream opened");
        self.active = Some(index);
        self.pump = Some(tokio::spawn(async move {
            while let Some(chunk) = source.recv().await {
                if writer.send_blob(&chunk).is_err() {
                    break;
                }
            }
            let _ = writer.finish();
        }));
    }

    /// Handles a remote-initiated close of the active stream.
    ///
    /// Re-arms exactly one replacement while `connected` holds; the
    /// explicit condition is the stop rule that bounds re-arming.
    pub fn handle_remote_close(
        &mut self,
        index: StreamIndex,
        connected: bool,
        table: &mut StreamTable,
    ) {
        if self.active != Some(index) {
            return;
        }
        debug!(%index, "remote closed audio stream");
        self.abort_pump();
        self.active = None;
        if connected {
            self.start(table);
        }
    }

    /// Stops capture on session teardown.
    pub fn stop(&mut self) {
        self.abort_pump();
        self.active = None;
    }

    fn abort_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::transport::tunnel::TunnelCommand;
    use crate::transport::TunnelHandle;

    /// Factory producing fresh recorder channels on demand.
    struct TestFactory {
        senders: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
        refuse: bool,
    }

    impl TestFactory {
        fn new(refuse: bool) -> Arc<Self> {
            Arc::new(Self {
                senders: Mutex::new(Vec::new()),
                refuse,
            })
        }
    }

    impl AudioRecorderFactory for TestFactory {
        fn open(&self, _mimetype: &str) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
            if self.refuse {
                return None;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().push(tx);
            Some(rx)
        }
    }

    fn setup(
        factory: Arc<TestFactory>,
    ) -> (AudioInputStreamer, StreamTable, UnboundedReceiver<TunnelCommand>) {
        let (tunnel, commands) = TunnelHandle::mock();
        (
            AudioInputStreamer::new(factory),
            StreamTable::new(tunnel),
            commands,
        )
    }

    fn sent(commands: &mut UnboundedReceiver<TunnelCommand>) -> Vec<Instruction> {
        let mut out = Vec::new();
        while let Ok(cmd) = commands.try_recv() {
            if let Some(ins) = cmd.into_instruction() {
                out.push(ins);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_start_opens_negotiated_stream() {
        let factory = TestFactory::new(false);
        let (mut audio, mut table, mut commands) = setup(Arc::clone(&factory));

        audio.start(&mut table);

        let out = sent(&mut commands);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode(), "audio");
        assert_eq!(out[0].arg(1), AUDIO_INPUT_MIMETYPE);
        assert!(audio.active_index().is_some());
        assert_eq!(factory.senders.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_no_recorder_ends_stream_immediately() {
        let factory = TestFactory::new(true);
        let (mut audio, mut table, mut commands) = setup(factory);

        audio.start(&mut table);

        let out = sent(&mut commands);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode(), "audio");
        assert_eq!(out[1].opcode(), "end");
        assert!(audio.active_index().is_none());
    }

    #[tokio::test]
    async fn test_chunks_pumped_as_blobs() {
        let factory = TestFactory::new(false);
        let (mut audio, mut table, mut commands) = setup(Arc::clone(&factory));

        audio.start(&mut table);
        let _ = sent(&mut commands);

        factory.senders.lock()[0]
            .send(vec![0u8, 1, 2, 3])
            .expect("chunk");
        tokio::task::yield_now().await;

        let out = sent(&mut commands);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode(), "blob");
        assert_eq!(
            out[0].arg(0),
            audio.active_index().expect("active").to_string()
        );
    }

    #[tokio::test]
    async fn test_remote_close_rearms_exactly_once() {
        let factory = TestFactory::new(false);
        let (mut audio, mut table, mut commands) = setup(Arc::clone(&factory));

        audio.start(&mut table);
        let first = audio.active_index().expect("active");
        let _ = sent(&mut commands);

        audio.handle_remote_close(first, true, &mut table);

        let out = sent(&mut commands);
        let opens: Vec<_> = out.iter().filter(|i| i.opcode() == "audio").collect();
        assert_eq!(opens.len(), 1, "exactly one replacement stream");
        let second = audio.active_index().expect("rearmed");
        assert_ne!(first, second, "no index reuse");
        assert_eq!(factory.senders.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_no_rearm_after_disconnect() {
        let factory = TestFactory::new(false);
        let (mut audio, mut table, mut commands) = setup(factory);

        audio.start(&mut table);
        let first = audio.active_index().expect("active");
        let _ = sent(&mut commands);

        audio.handle_remote_close(first, false, &mut table);

        assert!(sent(&mut commands).is_empty());
        assert!(audio.active_index().is_none());
    }

    #[tokio::test]
    async fn test_close_of_foreign_stream_is_ignored() {
        let factory = TestFactory::new(false);
        let (mut audio, mut table, mut commands) = setup(factory);

        audio.start(&mut table);
        let _ = sent(&mut commands);

        audio.handle_remote_close(StreamIndex::new(999), true, &mut table);
        assert!(sent(&mut commands).is_empty());
    }
}
