//! `RaftNode`: the single event loop that owns role transitions, the
//! proposal queue, and peer replication (spec.md §9, §4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::common::NodeId;
use crate::error::{Error, Result};
use crate::raft::config::RaftConfig;
use crate::raft::election::{randomized_election_timeout, should_grant_vote};
use crate::raft::log_store::LogStore;
use crate::raft::persistent_state::PersistentStateStore;
use crate::raft::proposal::{ProposalRegistry, ProposalResult};
use crate::raft::replication::{advance_commit_index, backtrack_next_index};
use crate::raft::role::{has_quorum, CandidateState, LeaderState, Role};
use crate::raft::rpc::RaftRpcClient;
use crate::raft::snapshot;
use crate::raft::state_machine::StateMachine;
use crate::raft::types::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    LogEntry, LogIndex, Term, VoteRequest, VoteResponse,
};

struct ProposalSubmission {
    command: Vec<u8>,
    completion: oneshot::Sender<ProposalResult>,
}

/// A single Raft node. Owns one log, one role, one proposal queue; `run()`
/// drives its event loop and `propose`/`handle_*` may be called concurrently
/// by the embedder's RPC server and client-facing API.
pub struct RaftNode {
    config: RaftConfig,
    persistent_state: RwLock<PersistentStateStore>,
    log: RwLock<LogStore>,
    state_machine: Arc<dyn StateMachine>,
    role: RwLock<Role>,
    commit_index: AtomicU64,
    proposals: ProposalRegistry,
    rpc: Arc<dyn RaftRpcClient>,
    proposal_tx: mpsc::Sender<ProposalSubmission>,
    proposal_rx: Mutex<Option<mpsc::Receiver<ProposalSubmission>>>,
    replicate_now: Notify,
    election_deadline: SyncMutex<Instant>,
}

impl RaftNode {
    pub async fn new(
        config: RaftConfig,
        state_machine: Arc<dyn StateMachine>,
        rpc: Arc<dyn RaftRpcClient>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.persistence_path).await?;
        let persistent_state = PersistentStateStore::open(&config.persistence_path).await?;
        let log = LogStore::open(&config.persistence_path).await?;
        let (proposal_tx, proposal_rx) = mpsc::channel(config.proposal_queue_capacity);
        let election_deadline =
            Instant::now() + randomized_election_timeout(config.election_timeout_base);

        Ok(Arc::new(Self {
            config,
            persistent_state: RwLock::new(persistent_state),
            log: RwLock::new(log),
            state_machine,
            role: RwLock::new(Role::default()),
            commit_index: AtomicU64::new(0),
            proposals: ProposalRegistry::new(),
            rpc,
            proposal_tx,
            proposal_rx: Mutex::new(Some(proposal_rx)),
            replicate_now: Notify::new(),
            election_deadline: SyncMutex::new(election_deadline),
        }))
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub async fn is_leader(&self) -> bool {
        self.role.read().await.is_leader()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index.load(Ordering::SeqCst)
    }

    /// Submits `command` for replication. Resolves once the entry commits
    /// and is applied; fails immediately if this node isn't leader or the
    /// proposal queue is full (spec.md §5 backpressure).
    pub async fn propose(&self, command: Vec<u8>) -> Result<Vec<u8>> {
        {
            let role = self.role.read().await;
            if !role.is_leader() {
                return Err(Error::NotLeader { leader_hint: role.leader_hint() });
            }
        }
        let (tx, rx) = oneshot::channel();
        self.proposal_tx
            .try_send(ProposalSubmission { command, completion: tx })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => {
                    Error::Unavailable("node is shutting down".into())
                }
            })?;
        rx.await
            .map_err(|_| Error::Internal("proposal completion sender dropped".into()))?
    }

    /// Runs the event loop until the process shuts down. Spawn this once per
    /// node.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut proposal_rx = self
            .proposal_rx
            .lock()
            .await
            .take()
            .expect("RaftNode::run called more than once");

        loop {
            let is_leader = self.is_leader().await;
            let deadline = if is_leader {
                Instant::now() + self.config.heartbeat_interval
            } else {
                *self.election_deadline.lock()
            };

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if is_leader {
                        self.replicate_to_all_peers().await;
                    } else {
                        self.start_election().await;
                        self.reset_election_timer();
                    }
                }
                _ = self.replicate_now.notified(), if is_leader => {
                    self.replicate_to_all_peers().await;
                }
                Some(submission) = proposal_rx.recv() => {
                    self.handle_proposal_submission(submission).await;
                }
            }
        }
    }

    fn reset_election_timer(&self) {
        *self.election_deadline.lock() =
            Instant::now() + randomized_election_timeout(self.config.election_timeout_base);
    }

    async fn handle_proposal_submission(&self, submission: ProposalSubmission) {
        if !self.is_leader().await {
            let hint = self.role.read().await.leader_hint();
            let _ = submission
                .completion
                .send(Err(Error::NotLeader { leader_hint: hint }));
            return;
        }
        let term = self.persistent_state.read().await.current_term();
        let index = {
            let mut log = self.log.write().await;
            let index = log.last_index() + 1;
            if let Err(e) = log.append(LogEntry::new(term, index, submission.command)).await {
                let _ = submission.completion.send(Err(e));
                return;
            }
            index
        };
        self.proposals.register_with_sender(index, term, submission.completion);
        self.replicate_now.notify_one();
    }

    async fn start_election(&self) {
        let (term, last_log_index, last_log_term) = {
            let mut persistent = self.persistent_state.write().await;
            let new_term = persistent.current_term() + 1;
            if persistent.set_current_term(new_term).await.is_err() {
                return;
            }
            if persistent
                .set_voted_for(Some(self.config.node_id.clone()))
                .await
                .is_err()
            {
                return;
            }
            let log = self.log.read().await;
            (new_term, log.last_index(), log.last_term())
        };
        *self.role.write().await = Role::Candidate(CandidateState {
            votes_received: std::iter::once(self.config.node_id.clone()).collect(),
        });
        info!(term, node_id = %self.config.node_id, "starting election");

        let quorum = self.config.quorum();
        if has_quorum(1, quorum) {
            self.become_leader(term).await;
            return;
        }

        let mut join_set = JoinSet::new();
        for peer in self.config.peers.clone() {
            let rpc = self.rpc.clone();
            let timeout = self.config.rpc_timeout;
            let request = VoteRequest {
                term,
                candidate_id: self.config.node_id.clone(),
                last_log_index,
                last_log_term,
            };
            join_set.spawn(async move {
                tokio::time::timeout(timeout, rpc.request_vote(&peer.node_id, request)).await
            });
        }

        let mut votes = 1usize;
        while let Some(joined) = join_set.join_next().await {
            let Ok(Ok(Ok(response))) = joined else { continue };
            if response.term > term {
                self.become_follower(response.term, None).await;
                return;
            }
            if !response.vote_granted {
                continue;
            }
            votes += 1;
            if votes < quorum {
                continue;
            }
            let still_candidate = matches!(&*self.role.read().await, Role::Candidate(_))
                && self.persistent_state.read().await.current_term() == term;
            if still_candidate {
                self.become_leader(term).await;
                return;
            }
        }
    }

    async fn become_leader(&self, term: Term) {
        let last_log_index = self.log.read().await.last_index();
        let peer_ids = self.config.peers.iter().map(|p| p.node_id.clone());
        *self.role.write().await = Role::Leader(LeaderState::new(peer_ids, last_log_index));
        info!(term, node_id = %self.config.node_id, "became leader");
        self.replicate_to_all_peers().await;
    }

    async fn become_follower(&self, term: Term, leader_hint: Option<NodeId>) {
        {
            let mut persistent = self.persistent_state.write().await;
            let _ = persistent.step_down_if_greater_term(term).await;
        }
        let was_leader = self.role.read().await.is_leader();
        *self.role.write().await = Role::Follower { leader_hint };
        if was_leader {
            warn!(node_id = %self.config.node_id, "stepping down from leader");
            self.proposals.fail_all();
        }
        self.reset_election_timer();
    }

    async fn replicate_to_all_peers(&self) {
        let term = self.persistent_state.read().await.current_term();
        let peer_ids: Vec<NodeId> = {
            let role = self.role.read().await;
            match &*role {
                Role::Leader(state) => state.peers.keys().cloned().collect(),
                _ => return,
            }
        };
        for peer_id in &peer_ids {
            self.replicate_to_peer(peer_id, term).await;
        }
        self.recompute_commit_and_apply(term).await;
    }

    async fn replicate_to_peer(&self, peer_id: &NodeId, term: Term) {
        let needs_snapshot = {
            let next_index = {
                let role = self.role.read().await;
                let Role::Leader(state) = &*role else { return };
                match state.peers.get(peer_id) {
                    Some(progress) => progress.next_index,
                    None => return,
                }
            };
            let log = self.log.read().await;
            next_index <= log.last_snapshot_index()
        };
        if needs_snapshot {
            self.send_install_snapshot_to_peer(peer_id, term).await;
            return;
        }

        let Some((next_index, prev_log_index, prev_log_term, entries, leader_commit_index)) =
            self.build_append_request(peer_id).await
        else {
            return;
        };

        let request = AppendEntriesRequest {
            term,
            leader_id: self.config.node_id.clone(),
            prev_log_index,
            prev_log_term,
            entries: entries.clone(),
            leader_commit_index,
        };
        let outcome = tokio::time::timeout(
            self.config.rpc_timeout,
            self.rpc.append_entries(peer_id, request),
        )
        .await;
        let Ok(Ok(response)) = outcome else { return };

        if response.term > term {
            self.become_follower(response.term, None).await;
            return;
        }

        if response.success {
            let new_match = response
                .match_index
                .unwrap_or(next_index + entries.len() as LogIndex - 1);
            let mut role = self.role.write().await;
            if let Role::Leader(state) = &mut *role {
                if let Some(progress) = state.peers.get_mut(peer_id) {
                    progress.match_index = progress.match_index.max(new_match);
                    progress.next_index = progress.match_index + 1;
                }
            }
        } else {
            let new_next = {
                let log = self.log.read().await;
                backtrack_next_index(next_index, &response, &log)
            };
            let mut role = self.role.write().await;
            if let Role::Leader(state) = &mut *role {
                if let Some(progress) = state.peers.get_mut(peer_id) {
                    progress.next_index = new_next;
                }
            }
        }
    }

    /// Sends the leader's current compaction boundary to a peer whose
    /// `next_index` has fallen at or below it (spec.md §4.1 step 2: a peer
    /// this far behind can no longer be caught up via `AppendEntries` since
    /// the entries it's missing were already dropped from the log).
    async fn send_install_snapshot_to_peer(&self, peer_id: &NodeId, term: Term) {
        let (last_included_index, last_included_term, data) = {
            let log = self.log.read().await;
            let Some(data) = log.snapshot_data() else { return };
            (log.last_snapshot_index(), log.last_snapshot_term(), data.to_vec())
        };
        let request = InstallSnapshotRequest {
            term,
            leader_id: self.config.node_id.clone(),
            last_included_index,
            last_included_term,
            data,
        };
        let outcome = tokio::time::timeout(
            self.config.rpc_timeout,
            self.rpc.install_snapshot(peer_id, request),
        )
        .await;
        let Ok(Ok(response)) = outcome else { return };

        if response.term > term {
            self.become_follower(response.term, None).await;
            return;
        }

        let mut role = self.role.write().await;
        if let Role::Leader(state) = &mut *role {
            if let Some(progress) = state.peers.get_mut(peer_id) {
                progress.match_index = progress.match_index.max(last_included_index);
                progress.next_index = last_included_index + 1;
            }
        }
    }

    async fn build_append_request(
        &self,
        peer_id: &NodeId,
    ) -> Option<(LogIndex, LogIndex, Term, Vec<LogEntry>, LogIndex)> {
        let next_index = {
            let role = self.role.read().await;
            let Role::Leader(state) = &*role else { return None };
            state.peers.get(peer_id)?.next_index
        };
        let log = self.log.read().await;
        let prev_log_index = next_index.saturating_sub(1);
        let prev_log_term = log.term_at(prev_log_index).unwrap_or(0);
        let entries: Vec<LogEntry> = log
            .entries_from(next_index)
            .into_iter()
            .take(self.config.max_entries_per_append)
            .collect();
        Some((
            next_index,
            prev_log_index,
            prev_log_term,
            entries,
            self.commit_index(),
        ))
    }

    async fn recompute_commit_and_apply(&self, term: Term) {
        let match_indices: Vec<LogIndex> = {
            let role = self.role.read().await;
            match &*role {
                Role::Leader(state) => state.peers.values().map(|p| p.match_index).collect(),
                _ => return,
            }
        };
        let quorum = self.config.quorum();
        let current_commit = self.commit_index();
        let new_commit = {
            let log = self.log.read().await;
            advance_commit_index(current_commit, term, &match_indices, quorum, &log)
        };
        if new_commit > current_commit {
            self.commit_index.store(new_commit, Ordering::SeqCst);
            self.apply_committed(new_commit).await;
        }
    }

    async fn apply_committed(&self, commit_index: LogIndex) {
        let start = self.state_machine.last_applied() + 1;
        let mut results: HashMap<LogIndex, ProposalResult> = HashMap::new();
        {
            let mut log = self.log.write().await;
            for index in start..=commit_index {
                let Some(entry) = log.entry_at(index) else { break };
                let command = entry.command.clone();
                let result = self.state_machine.apply(index, &command).await;
                results.insert(index, result);
            }
            match snapshot::maybe_compact(&mut log, &self.state_machine, self.config.snapshot_threshold)
                .await
            {
                Ok(Some(_)) => debug!(commit_index, "compacted log after applying"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "snapshot compaction failed"),
            }
        }
        self.proposals.resolve_up_to(commit_index, |index| {
            results.remove(&index).unwrap_or_else(|| Ok(Vec::new()))
        });
    }

    pub async fn handle_vote_request(&self, request: VoteRequest) -> VoteResponse {
        let mut persistent = self.persistent_state.write().await;
        if request.term > persistent.current_term() {
            let _ = persistent.step_down_if_greater_term(request.term).await;
            drop(persistent);
            self.become_follower(request.term, None).await;
            persistent = self.persistent_state.write().await;
        }
        let current_term = persistent.current_term();
        if request.term < current_term {
            return VoteResponse { term: current_term, vote_granted: false };
        }

        let voted_for = persistent.voted_for().cloned();
        let (last_index, last_term) = {
            let log = self.log.read().await;
            (log.last_index(), log.last_term())
        };
        let granted = should_grant_vote(
            &request,
            current_term,
            voted_for.as_deref(),
            last_index,
            last_term,
        );
        if granted {
            let _ = persistent
                .set_voted_for(Some(request.candidate_id.clone()))
                .await;
            drop(persistent);
            self.reset_election_timer();
        }
        VoteResponse { term: current_term, vote_granted: granted }
    }

    pub async fn handle_append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        {
            let mut persistent = self.persistent_state.write().await;
            if request.term > persistent.current_term() {
                let _ = persistent.step_down_if_greater_term(request.term).await;
            }
        }
        let current_term = self.persistent_state.read().await.current_term();
        if request.term < current_term {
            return AppendEntriesResponse {
                term: current_term,
                success: false,
                match_index: None,
                conflict_term: None,
                conflict_index: None,
            };
        }

        *self.role.write().await = Role::Follower { leader_hint: Some(request.leader_id.clone()) };
        self.reset_election_timer();

        let mut log = self.log.write().await;
        if request.prev_log_index > 0 {
            match log.term_at(request.prev_log_index) {
                Some(term) if term == request.prev_log_term => {}
                Some(conflict_term) => {
                    let conflict_index = log
                        .first_index_in_term(conflict_term)
                        .unwrap_or(request.prev_log_index);
                    return AppendEntriesResponse {
                        term: current_term,
                        success: false,
                        match_index: None,
                        conflict_term: Some(conflict_term),
                        conflict_index: Some(conflict_index),
                    };
                }
                None => {
                    return AppendEntriesResponse {
                        term: current_term,
                        success: false,
                        match_index: None,
                        conflict_term: None,
                        conflict_index: Some(log.last_index() + 1),
                    };
                }
            }
        }

        if let Err(e) = log.append_entries(request.entries).await {
            warn!(error = %e, "failed to persist replicated entries");
            return AppendEntriesResponse {
                term: current_term,
                success: false,
                match_index: None,
                conflict_term: None,
                conflict_index: None,
            };
        }
        let match_index = log.last_index();
        drop(log);

        if request.leader_commit_index > self.commit_index() {
            let new_commit = request.leader_commit_index.min(match_index);
            self.commit_index.store(new_commit, Ordering::SeqCst);
            self.apply_committed(new_commit).await;
        }

        AppendEntriesResponse {
            term: current_term,
            success: true,
            match_index: Some(match_index),
            conflict_term: None,
            conflict_index: None,
        }
    }

    pub async fn handle_install_snapshot(
        &self,
        request: InstallSnapshotRequest,
    ) -> InstallSnapshotResponse {
        {
            let mut persistent = self.persistent_state.write().await;
            if request.term > persistent.current_term() {
                let _ = persistent.step_down_if_greater_term(request.term).await;
            }
        }
        let current_term = self.persistent_state.read().await.current_term();
        if request.term < current_term {
            return InstallSnapshotResponse { term: current_term };
        }

        *self.role.write().await = Role::Follower { leader_hint: Some(request.leader_id.clone()) };
        self.reset_election_timer();

        if request.last_included_index <= self.commit_index() {
            // Stale snapshot from a slow or retried RPC; our state machine is
            // already at least that far along (spec.md §4.5 "ignore if
            // lastIncludedIndex <= commitIndex").
            return InstallSnapshotResponse { term: current_term };
        }

        let mut log = self.log.write().await;
        match snapshot::install_snapshot(&request, &mut log, &self.state_machine).await {
            Ok(()) => self.commit_index.fetch_max(request.last_included_index, Ordering::SeqCst),
            Err(e) => {
                warn!(error = %e, "failed to install snapshot");
                0
            }
        };
        InstallSnapshotResponse { term: current_term }
    }
}
