//! Per-job print sequencing.
//!
//! A task checks printer status and applies density once, then runs the
//! fixed hardware sequence for every copy:
//! paper type, wake, enable, raster, form feed, stop (acknowledged).
//! The delays between phases are firmware timing constants, not tunables.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::channel::CommandChannel;
use crate::events::{EventEmitter, PrintProgress, PrinterEvent};
use crate::options::PrintTaskOptions;
use crate::protocol::command::is_stop_ack;
use crate::protocol::{Command, PrinterStatus};
use crate::raster::EncodedImage;
use crate::{FicheroError, Result};

/// Wait for the printer to apply a density change.
const DELAY_AFTER_DENSITY: Duration = Duration::from_millis(100);

/// Minimum gap between sequential control commands.
const DELAY_COMMAND_GAP: Duration = Duration::from_millis(50);

/// Wait for the print head after the raster transfer.
const DELAY_RASTER_SETTLE: Duration = Duration::from_millis(500);

/// Wait after form feed before sending stop.
const DELAY_AFTER_FEED: Duration = Duration::from_millis(300);

/// The stop command is acknowledged only after the cut/feed cycle.
pub const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a task currently is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrintTaskState {
    Init,
    /// Preconditions passed and density applied; pages may be sent.
    Ready,
    SetPaper,
    Wake,
    Enable,
    SendRaster,
    FormFeed,
    AwaitStopAck,
    Done,
    Failed,
}

/// One print job against a connected printer.
#[async_trait]
pub trait PrintTask: Send {
    /// Check preconditions and apply job-wide settings.
    async fn print_init(&mut self) -> Result<()>;

    /// Print `quantity` copies of `image`.
    async fn print_page(&mut self, image: &EncodedImage, quantity: u32) -> Result<()>;

    async fn wait_for_finished(&mut self) -> Result<()>;

    async fn print_end(&mut self) -> Result<()>;

    fn state(&self) -> PrintTaskState;
}

/// Print task for the D11s command set.
pub struct D11sPrintTask {
    channel: Arc<CommandChannel>,
    events: EventEmitter,
    options: PrintTaskOptions,
    state: PrintTaskState,
}

impl D11sPrintTask {
    pub fn new(
        channel: Arc<CommandChannel>,
        events: EventEmitter,
        options: PrintTaskOptions,
    ) -> Self {
        Self {
            channel,
            events,
            options,
            state: PrintTaskState::Init,
        }
    }

    pub fn options(&self) -> &PrintTaskOptions {
        &self.options
    }

    fn enter(&mut self, state: PrintTaskState) {
        tracing::debug!(from = ?self.state, to = ?state, "Print task transition");
        self.state = state;
    }

    fn fail(&mut self, err: FicheroError) -> FicheroError {
        self.enter(PrintTaskState::Failed);
        err
    }

    fn progress(&self, page: u32, fed: bool) {
        self.events.emit(PrinterEvent::PrintProgress(PrintProgress {
            page,
            page_print_progress: 100,
            page_feed_progress: if fed { 100 } else { 0 },
        }));
    }

    async fn print_copy(&mut self, frame: &[u8], page: u32) -> Result<()> {
        let paper = self.options.label_type.paper_byte();

        self.enter(PrintTaskState::SetPaper);
        self.channel
            .request(Command::set_paper_type(paper).as_bytes())
            .await?;
        tokio::time::sleep(DELAY_COMMAND_GAP).await;

        self.enter(PrintTaskState::Wake);
        self.channel.write(Command::wake().as_bytes()).await?;
        tokio::time::sleep(DELAY_COMMAND_GAP).await;

        self.enter(PrintTaskState::Enable);
        self.channel.write(Command::enable_printer().as_bytes()).await?;
        tokio::time::sleep(DELAY_COMMAND_GAP).await;

        self.enter(PrintTaskState::SendRaster);
        self.channel.send_bulk(frame).await?;
        tokio::time::sleep(DELAY_RASTER_SETTLE).await;

        self.enter(PrintTaskState::FormFeed);
        self.channel.write(Command::form_feed().as_bytes()).await?;
        tokio::time::sleep(DELAY_AFTER_FEED).await;

        self.progress(page, false);

        self.enter(PrintTaskState::AwaitStopAck);
        let r = self
            .channel
            .send(Command::stop_print().as_bytes(), true, STOP_ACK_TIMEOUT)
            .await?;
        if r.is_empty() {
            return Err(FicheroError::StopTimeout(STOP_ACK_TIMEOUT));
        }
        if !is_stop_ack(&r) {
            tracing::warn!(page, response = ?r, "Stop command answered without 0xAA/OK");
        }

        self.progress(page, true);
        Ok(())
    }
}

#[async_trait]
impl PrintTask for D11sPrintTask {
    async fn print_init(&mut self) -> Result<()> {
        self.enter(PrintTaskState::Init);
        if let Err(e) = self.options.validate() {
            return Err(self.fail(e));
        }

        let r = self.channel.request(Command::get_status().as_bytes()).await?;
        match PrinterStatus::from_response(&r) {
            Some(status) if !status.ready_to_print() => {
                tracing::warn!(%status, "Printer not ready, aborting task");
                return Err(self.fail(FicheroError::NotReady(status)));
            }
            Some(status) => tracing::debug!(%status, "Printer status checked"),
            None => tracing::warn!("No status response, continuing without precondition check"),
        }

        self.channel
            .request(Command::set_density(self.options.density).as_bytes())
            .await?;
        tokio::time::sleep(DELAY_AFTER_DENSITY).await;
        self.enter(PrintTaskState::Ready);
        Ok(())
    }

    async fn print_page(&mut self, image: &EncodedImage, quantity: u32) -> Result<()> {
        match self.state {
            PrintTaskState::Ready | PrintTaskState::Done => {}
            PrintTaskState::Failed => {
                return Err(FicheroError::Protocol(
                    "print task failed its precondition check".into(),
                ));
            }
            state => {
                return Err(FicheroError::Protocol(format!(
                    "print_page called before print_init succeeded (state {state:?})"
                )));
            }
        }
        if image.rows() == 0 {
            return Err(FicheroError::InvalidImageSize {
                width: (image.cols() * 8) as u32,
                height: 0,
                reason: "image has no rows",
            });
        }
        let frame = image.to_frame()?;

        tracing::info!(
            rows = image.rows(),
            bytes = frame.len(),
            copies = quantity,
            "Printing page"
        );
        for copy in 0..quantity {
            self.print_copy(&frame, copy + 1).await?;
        }

        self.enter(PrintTaskState::Done);
        Ok(())
    }

    async fn wait_for_finished(&mut self) -> Result<()> {
        // Each copy already waited for its stop acknowledgment.
        Ok(())
    }

    async fn print_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn state(&self) -> PrintTaskState {
        self.state
    }
}
