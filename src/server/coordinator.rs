//! The coordinator: sole owner of the membership set
//!
//! Connection handlers never touch the set directly. They send join, leave
//! and broadcast events through a [`CoordinatorHandle`]; one task applies
//! them one at a time, which is what keeps the set consistent without locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ChatConfig;
use crate::error::{ChatError, Result};
use crate::message::ChatMessage;
use crate::session::{Outbound, Session, SessionId};

/// A joined session together with the only producer for its outbound queue
#[derive(Debug)]
struct Member {
    session: Arc<Session>,
    outbound: Outbound,
}

/// Snapshot of coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Sessions currently in the membership set
    pub members: usize,
    /// Messages enqueued onto recipient queues since start
    pub delivered: u64,
    /// Recipients removed because their queue stayed full
    pub evictions: u64,
}

/// Cloneable sending side used by connection handlers
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    join_tx: mpsc::Sender<Member>,
    leave_tx: mpsc::Sender<SessionId>,
    broadcast_tx: mpsc::Sender<ChatMessage>,
    stats_tx: mpsc::Sender<oneshot::Sender<CoordinatorStats>>,
}

impl CoordinatorHandle {
    /// Register a session. Ownership of `outbound` passes to the coordinator,
    /// which from now on is the only task able to enqueue to or close it.
    pub async fn join(&self, session: Arc<Session>, outbound: Outbound) -> Result<()> {
        self.join_tx
            .send(Member { session, outbound })
            .await
            .map_err(|_| ChatError::coordinator_closed("join channel closed"))
    }

    /// Unregister a session and close its outbound queue
    pub async fn leave(&self, id: SessionId) -> Result<()> {
        self.leave_tx
            .send(id)
            .await
            .map_err(|_| ChatError::coordinator_closed("leave channel closed"))
    }

    /// Fan a message out to every member except its sender
    pub async fn broadcast(&self, message: ChatMessage) -> Result<()> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| ChatError::coordinator_closed("broadcast channel closed"))
    }

    /// Ask the coordinator for its current counters
    pub async fn stats(&self) -> Result<CoordinatorStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.stats_tx
            .send(reply_tx)
            .await
            .map_err(|_| ChatError::coordinator_closed("stats channel closed"))?;
        reply_rx
            .await
            .map_err(|_| ChatError::coordinator_closed("stats reply dropped"))
    }
}

/// Single serialization point for membership changes and fanout
pub struct Coordinator {
    members: HashMap<SessionId, Member>,
    join_rx: mpsc::Receiver<Member>,
    leave_rx: mpsc::Receiver<SessionId>,
    broadcast_rx: mpsc::Receiver<ChatMessage>,
    stats_rx: mpsc::Receiver<oneshot::Sender<CoordinatorStats>>,
    send_timeout: Duration,
    delivered: u64,
    evictions: u64,
}

impl Coordinator {
    /// Create a coordinator and the handle that feeds it
    pub fn new(config: &ChatConfig) -> (Self, CoordinatorHandle) {
        let capacity = config.event_capacity.max(1);
        let (join_tx, join_rx) = mpsc::channel(capacity);
        let (leave_tx, leave_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (stats_tx, stats_rx) = mpsc::channel(capacity);

        let coordinator = Self {
            members: HashMap::new(),
            join_rx,
            leave_rx,
            broadcast_rx,
            stats_rx,
            send_timeout: config.send_timeout,
            delivered: 0,
            evictions: 0,
        };
        let handle = CoordinatorHandle {
            join_tx,
            leave_tx,
            broadcast_tx,
            stats_tx,
        };
        (coordinator, handle)
    }

    /// Create a coordinator and run it on its own task
    pub fn spawn(config: &ChatConfig) -> (CoordinatorHandle, JoinHandle<()>) {
        let (coordinator, handle) = Self::new(config);
        let task = tokio::spawn(coordinator.run());
        (handle, task)
    }

    /// Process events until every handle has been dropped.
    ///
    /// The select is biased join, leave, broadcast, stats: a handler's join
    /// is always sent before its leave, so polling joins first means a leave
    /// is never applied ahead of the join it undoes. A stats reply therefore
    /// also means every event queued before the request has been applied.
    ///
    /// Membership events jump ahead of broadcasts that are already queued.
    /// Both are O(1) to apply, so fanout only waits while joins and leaves
    /// keep arriving faster than they are applied (connection churn); the
    /// broadcast channel is drained as soon as both are empty. Messages from
    /// one connection still go out in the order it sent them.
    pub async fn run(mut self) {
        info!("Coordinator started");

        loop {
            tokio::select! {
                biased;

                Some(member) = self.join_rx.recv() => self.handle_join(member),
                Some(id) = self.leave_rx.recv() => self.handle_leave(&id),
                Some(message) = self.broadcast_rx.recv() => self.handle_broadcast(message).await,
                Some(reply) = self.stats_rx.recv() => {
                    let _ = reply.send(self.stats());
                }
                else => break,
            }
        }

        info!("Coordinator stopped with {} members", self.members.len());
    }

    fn handle_join(&mut self, member: Member) {
        let id = member.session.id().clone();
        if self.members.contains_key(&id) {
            warn!("Session {} joined twice; ignoring", id);
            return;
        }

        debug!("Session {} joined from {}", id, member.session.addr());
        self.members.insert(id, member);
    }

    fn handle_leave(&mut self, id: &SessionId) {
        // Dropping the member drops the last producer, closing the queue.
        match self.members.remove(id) {
            Some(member) => debug!("Session {} left from {}", id, member.session.addr()),
            None => debug!("Leave for non-member session {}", id),
        }
    }

    async fn handle_broadcast(&mut self, message: ChatMessage) {
        let mut stalled = Vec::new();

        for (id, member) in &self.members {
            if *id == message.sender {
                continue;
            }

            match member.outbound.try_send(message.clone()) {
                Ok(()) => self.delivered += 1,
                Err(TrySendError::Full(message)) => {
                    match timeout(self.send_timeout, member.outbound.send(message)).await {
                        Ok(Ok(())) => self.delivered += 1,
                        Ok(Err(_)) => debug!("Writer for {} has exited; message dropped", id),
                        Err(_) => stalled.push(id.clone()),
                    }
                }
                // The writer stopped after a write error. The member stays
                // until its own read side ends.
                Err(TrySendError::Closed(_)) => {
                    debug!("Writer for {} has exited; message dropped", id)
                }
            }
        }

        for id in stalled {
            self.evict(&id);
        }
    }

    /// Remove a member whose queue stayed full past the send timeout
    fn evict(&mut self, id: &SessionId) {
        if let Some(member) = self.members.remove(id) {
            warn!(
                "Evicting slow consumer {} ({}) after {:?}",
                id,
                member.session.addr(),
                self.send_timeout
            );
            member.session.evict();
            self.evictions += 1;
        }
    }

    fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            members: self.members.len(),
            delivered: self.delivered,
            evictions: self.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{OutboundReceiver, outbound_queue};
    use tokio::sync::mpsc::error::TryRecvError;

    fn config() -> ChatConfig {
        ChatConfig {
            outbound_capacity: 8,
            send_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    async fn join(
        handle: &CoordinatorHandle,
        name: &str,
        capacity: usize,
    ) -> (Arc<Session>, OutboundReceiver) {
        let session = Arc::new(Session::with_id(
            SessionId::from(name),
            "127.0.0.1:9000".parse().unwrap(),
        ));
        let (outbound, rx) = outbound_queue(capacity);
        handle.join(Arc::clone(&session), outbound).await.unwrap();
        (session, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.content);
        }
        out
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, mut a_rx) = join(&handle, "A", 8).await;
        let (_b, mut b_rx) = join(&handle, "B", 8).await;

        handle
            .broadcast(ChatMessage::chat_line(a.id(), "hi"))
            .await
            .unwrap();
        let stats = handle.stats().await.unwrap();

        assert_eq!(stats.members, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(drain(&mut b_rx), vec!["A:hi"]);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_three_members_reach_exactly_two() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, mut a_rx) = join(&handle, "A", 8).await;
        let (_b, mut b_rx) = join(&handle, "B", 8).await;
        let (_c, mut c_rx) = join(&handle, "C", 8).await;

        handle
            .broadcast(ChatMessage::chat_line(a.id(), "x"))
            .await
            .unwrap();
        assert_eq!(handle.stats().await.unwrap().delivered, 2);

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), vec!["A:x"]);
        assert_eq!(drain(&mut c_rx), vec!["A:x"]);
    }

    #[tokio::test]
    async fn test_late_joiner_misses_earlier_messages() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, _a_rx) = join(&handle, "A", 8).await;

        handle
            .broadcast(ChatMessage::chat_line(a.id(), "early"))
            .await
            .unwrap();
        handle.stats().await.unwrap();

        let (_b, mut b_rx) = join(&handle, "B", 8).await;
        handle
            .broadcast(ChatMessage::chat_line(a.id(), "late"))
            .await
            .unwrap();
        handle.stats().await.unwrap();

        assert_eq!(drain(&mut b_rx), vec!["A:late"]);
    }

    #[tokio::test]
    async fn test_leave_closes_queue_and_stops_delivery() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, _a_rx) = join(&handle, "A", 8).await;
        let (b, mut b_rx) = join(&handle, "B", 8).await;

        handle
            .broadcast(ChatMessage::chat_line(a.id(), "before"))
            .await
            .unwrap();
        handle.stats().await.unwrap();
        handle.leave(b.id().clone()).await.unwrap();
        handle
            .broadcast(ChatMessage::chat_line(a.id(), "after"))
            .await
            .unwrap();

        assert_eq!(handle.stats().await.unwrap().members, 1);
        assert_eq!(b_rx.recv().await.unwrap().content, "A:before");
        assert!(b_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_repeated_leave_is_noop() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (_a, mut a_rx) = join(&handle, "A", 8).await;
        let (b, _b_rx) = join(&handle, "B", 8).await;

        handle.leave(b.id().clone()).await.unwrap();
        handle.leave(b.id().clone()).await.unwrap();
        handle.leave(SessionId::from("nobody")).await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.members, 1);
        assert_eq!(a_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_duplicate_join_keeps_first_queue() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, _a_rx) = join(&handle, "A", 8).await;
        let (_b, mut b_rx) = join(&handle, "B", 8).await;
        let (_b2, mut b2_rx) = join(&handle, "B", 8).await;

        handle
            .broadcast(ChatMessage::chat_line(a.id(), "hi"))
            .await
            .unwrap();
        assert_eq!(handle.stats().await.unwrap().members, 2);

        assert_eq!(drain(&mut b_rx), vec!["A:hi"]);
        // The rejected producer was dropped, so the duplicate queue is closed.
        assert_eq!(b2_rx.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_consumer_is_evicted() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, _a_rx) = join(&handle, "A", 8).await;
        let (slow, mut slow_rx) = join(&handle, "slow", 1).await;
        let (_c, mut c_rx) = join(&handle, "C", 8).await;

        for line in ["1", "2", "3"] {
            handle
                .broadcast(ChatMessage::chat_line(a.id(), line))
                .await
                .unwrap();
        }
        let stats = handle.stats().await.unwrap();

        assert_eq!(stats.members, 2);
        assert_eq!(stats.evictions, 1);
        assert!(slow.is_evicted());
        assert_eq!(drain(&mut c_rx), vec!["A:1", "A:2", "A:3"]);

        // Evicted queue holds what fit, then reports closed.
        assert_eq!(slow_rx.recv().await.unwrap().content, "A:1");
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_within_timeout_is_kept() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, _a_rx) = join(&handle, "A", 8).await;
        let (slow, mut slow_rx) = join(&handle, "slow", 1).await;

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(msg) = slow_rx.recv().await {
                seen.push(msg.content);
                if seen.len() == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            seen
        });

        for line in ["1", "2", "3"] {
            handle
                .broadcast(ChatMessage::chat_line(a.id(), line))
                .await
                .unwrap();
        }

        assert_eq!(reader.await.unwrap(), vec!["A:1", "A:2", "A:3"]);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.evictions, 0);
        assert!(!slow.is_evicted());
    }

    #[tokio::test]
    async fn test_exited_writer_does_not_remove_member() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, _a_rx) = join(&handle, "A", 8).await;
        let (_b, b_rx) = join(&handle, "B", 8).await;
        drop(b_rx);

        handle
            .broadcast(ChatMessage::chat_line(a.id(), "lost"))
            .await
            .unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.members, 2);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_membership_events_apply_before_queued_broadcasts() {
        let (handle, _task) = Coordinator::spawn(&config());
        let (a, _a_rx) = join(&handle, "A", 8).await;
        let (_b, mut b_rx) = join(&handle, "B", 8).await;
        handle.stats().await.unwrap();

        // Queued without yielding, so the coordinator sees all three at once.
        for line in ["1", "2"] {
            handle
                .broadcast(ChatMessage::chat_line(a.id(), line))
                .await
                .unwrap();
        }
        let (_c, mut c_rx) = join(&handle, "C", 8).await;
        handle.stats().await.unwrap();

        assert_eq!(drain(&mut b_rx), vec!["A:1", "A:2"]);
        assert_eq!(drain(&mut c_rx), vec!["A:1", "A:2"]);
    }

    #[tokio::test]
    async fn test_run_ends_when_handles_dropped() {
        let (handle, task) = Coordinator::spawn(&config());
        drop(handle);
        task.await.unwrap();
    }
}
