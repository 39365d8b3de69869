//! Request/response link to the coordinator.
//!
//! The coordinator ties deliveries to the connection that fetched them, so a
//! consumer keeps one link for its whole life and settles every delivery on
//! it. Dropping the link hands any unsettled deliveries back to the queue.

use crate::error::WorkerError;
use log::debug;
use shared::protocol::{
    read_packet, write_packet, Delivery, MergeOutcome, Packet, QueueStats, WorkerStatus,
};
use shared::NextState;
use std::time::Duration;
use tokio::net::TcpStream;

pub struct CoordinatorLink {
    stream: TcpStream,
}

impl CoordinatorLink {
    pub async fn connect(address: &str) -> Result<Self, WorkerError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to coordinator at {}", address);
        Ok(Self { stream })
    }

    async fn request(&mut self, packet: &Packet) -> Result<Packet, WorkerError> {
        write_packet(&mut self.stream, packet).await?;
        match read_packet(&mut self.stream).await? {
            Some(Packet::Error { kind, message }) => Err(WorkerError::Rejected { kind, message }),
            Some(response) => Ok(response),
            None => Err(WorkerError::Disconnected),
        }
    }

    /// Fetches up to `max` deliveries, waiting at most `wait` for the first.
    pub async fn fetch(&mut self, max: u32, wait: Duration) -> Result<Vec<Delivery>, WorkerError> {
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        match self.request(&Packet::Fetch { max, wait_ms }).await? {
            Packet::Deliveries { deliveries } => Ok(deliveries),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ack(&mut self, delivery_tag: u64) -> Result<(), WorkerError> {
        self.expect_done(&Packet::Ack { delivery_tag }).await
    }

    pub async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), WorkerError> {
        self.expect_done(&Packet::Nack {
            delivery_tag,
            requeue,
        })
        .await
    }

    pub async fn submit_result(
        &mut self,
        session_id: &str,
        next: NextState,
    ) -> Result<MergeOutcome, WorkerError> {
        let packet = Packet::SubmitResult {
            session_id: session_id.to_string(),
            next,
        };
        match self.request(&packet).await? {
            Packet::Merged { outcome } => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    pub async fn queue_depth(&mut self) -> Result<QueueStats, WorkerError> {
        match self.request(&Packet::QueueDepth).await? {
            Packet::Depth { stats } => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    pub async fn report_status(&mut self, status: WorkerStatus) -> Result<(), WorkerError> {
        self.expect_done(&Packet::ReportStatus { status }).await
    }

    async fn expect_done(&mut self, packet: &Packet) -> Result<(), WorkerError> {
        match self.request(packet).await? {
            Packet::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(packet: Packet) -> WorkerError {
    WorkerError::UnexpectedResponse(format!("{:?}", packet))
}
