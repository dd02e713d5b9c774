use crate::config::{validate_channels, TrackerConfig};
use crate::fusion::{FusionSettings, PoseFusion};
use crate::mailbox::{mailbox, MailboxReceiver};
use crate::reader::ChannelReader;
use crate::transport::{Connector, SerialConnector};
use crate::types::{ChannelConfig, ChannelKind, ChannelSet, ChannelStatus, ReaderStats, TickOutput};
use crate::{Result, TrackerError};
use std::sync::Arc;

/// Callback run on deactivation while every connection is still open.
pub type TeardownHook = Box<dyn FnMut(&TeardownContext<'_>) + Send>;

/// What a teardown hook may do: send final lines to the device.
pub struct TeardownContext<'a> {
    readers: &'a ChannelSet<ChannelReader>,
}

impl TeardownContext<'_> {
    /// Queue a line for `kind`. It is written before that connection closes.
    pub fn send_line(&self, kind: ChannelKind, line: &str) -> Result<()> {
        self.readers.get(kind).send_line(line)
    }

    pub fn status(&self, kind: ChannelKind) -> ChannelStatus {
        self.readers.get(kind).status()
    }
}

/// Readers and mailboxes that exist only while active.
struct Session {
    readers: ChannelSet<ChannelReader>,
    mailboxes: ChannelSet<MailboxReceiver<String>>,
}

/// Owns the three channel readers and the fusion engine.
///
/// Drive [`tick`](Self::tick) from the host's frame loop. Calibration and the
/// last known pose survive [`deactivate`](Self::deactivate)/[`activate`](Self::activate).
pub struct Tracker {
    connector: Arc<dyn Connector>,
    fusion: PoseFusion,
    session: Option<Session>,
    teardown: Option<TeardownHook>,
}

impl Tracker {
    /// Tracker reading real serial ports.
    pub fn new(settings: FusionSettings) -> Tracker {
        Self::with_connector(settings, Arc::new(SerialConnector))
    }

    /// Tracker opening its channels through `connector`.
    pub fn with_connector(settings: FusionSettings, connector: Arc<dyn Connector>) -> Tracker {
        Tracker {
            connector,
            fusion: PoseFusion::new(settings),
            session: None,
            teardown: None,
        }
    }

    /// Build from a full config and activate immediately.
    pub fn open(config: &TrackerConfig) -> Result<Tracker> {
        config.validate()?;
        let mut tracker = Tracker::new(config.fusion);
        tracker.activate(config.channels.clone())?;
        Ok(tracker)
    }

    /// Install the hook run at the start of every deactivation. Replaces any previous hook.
    pub fn register_teardown_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&TeardownContext<'_>) + Send + 'static,
    {
        self.teardown = Some(Box::new(hook));
    }

    /// Start one reader thread per channel. Returns once all threads are spawned.
    pub fn activate(&mut self, channels: ChannelSet<ChannelConfig>) -> Result<()> {
        if self.session.is_some() {
            return Err(TrackerError::AlreadyActive);
        }
        validate_channels(&channels)?;
        self.fusion.settings().layout.validate()?;

        let (mut readers, mailboxes) = channels
            .map(|kind, config| {
                let (tx, rx) = mailbox(config.max_queue_depth);
                (ChannelReader::new(kind, config, self.connector.clone(), tx), rx)
            })
            .unzip();

        // A failed spawn drops `readers`, which stops the ones already started.
        for (_, reader) in readers.iter_mut() {
            reader.start()?;
        }

        log::info!(
            "Tracker active: xy={} z={} orientation={}",
            readers.xy.config().port,
            readers.z.config().port,
            readers.orientation.config().port
        );
        self.session = Some(Session { readers, mailboxes });
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Run the teardown hook, then stop and join every reader and discard the mailboxes.
    ///
    /// No-op when inactive.
    pub fn deactivate(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Some(hook) = self.teardown.as_mut() {
            hook(&TeardownContext {
                readers: &session.readers,
            });
        }

        for (_, reader) in session.readers.iter() {
            reader.request_stop();
        }
        for (_, reader) in session.readers.iter_mut() {
            reader.join();
        }
        log::info!("Tracker inactive");
    }

    /// Fuse the latest data from every channel. Never blocks, never fails.
    ///
    /// While inactive the last known pose is reported with no button events.
    pub fn tick(&mut self) -> TickOutput {
        match &self.session {
            Some(session) => self.fusion.tick(&session.mailboxes),
            None => self.fusion.idle(),
        }
    }

    pub fn fusion(&self) -> &PoseFusion {
        &self.fusion
    }

    pub fn channel_status(&self) -> ChannelSet<ChannelStatus> {
        match &self.session {
            Some(session) => ChannelSet::from_fn(|kind| session.readers.get(kind).status()),
            None => ChannelSet::from_fn(|_| ChannelStatus::Stopped),
        }
    }

    /// Reader counters, `None` while inactive.
    pub fn channel_stats(&self) -> Option<ChannelSet<ReaderStats>> {
        self.session
            .as_ref()
            .map(|s| ChannelSet::from_fn(|kind| s.readers.get(kind).stats()))
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.deactivate();
    }
}
