// Replication coordinator - converts client PUT/GET into N-replica fan-out
// with quorum semantics, surfaces siblings, and repairs stale replicas on
// the read path. Also serves the inbound WRITE/GET side for its peers.

use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use crate::codec::{
    self, data_msg, get_msg, parse_data_msg, parse_get_msg, status_msg, write_msg, Command, Frames,
    Record,
};
use crate::config::ReplicationConfig;
use crate::error::{MecError, MecResult};
use crate::peers::{PeerFabric, REQUEST_TIMEOUT};
use crate::store::LocalStore;
use crate::vclock::{self, VectorClock};

/// Projection of a stored record for presentation: the value, its content
/// type, and the clock's max entry timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadValue {
    pub value: Vec<u8>,
    pub content_type: String,
    pub timestamp_ns: i64,
}

impl ReadValue {
    fn from_parts(value: Vec<u8>, content_type: String, clock: &VectorClock) -> Self {
        Self {
            value,
            content_type,
            timestamp_ns: clock.max_timestamp(),
        }
    }

    /// Value-level equality: value bytes and content type. Clocks are
    /// deliberately not consulted here.
    pub fn equal_to(&self, other: &ReadValue) -> bool {
        self.value == other.value && self.content_type == other.content_type
    }
}

/// Outcome of a quorum read. `Multi` is only produced when disjoint latest
/// clocks exist and the values genuinely differ - it is a successful result,
/// not an error.
#[derive(Debug, Clone)]
pub enum ReadResult {
    Single(ReadValue),
    Multi(Vec<ReadValue>),
}

#[derive(Clone)]
pub struct Coordinator {
    store: LocalStore,
    fabric: PeerFabric,
    replication: ReplicationConfig,
}

impl Coordinator {
    pub fn new(store: LocalStore, fabric: PeerFabric, replication: ReplicationConfig) -> Self {
        Self {
            store,
            fabric,
            replication,
        }
    }

    /// Subscribe to WRITE and GET and serve them from a background task.
    pub async fn listen(&self) {
        let mut writes = self.fabric.subscribe(Command::Write).await;
        let mut gets = self.fabric.subscribe(Command::Get).await;
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    write = writes.recv() => match write {
                        Some(frames) => coordinator.on_write(frames).await,
                        None => break,
                    },
                    get = gets.recv() => match get {
                        Some(frames) => coordinator.on_get(frames).await,
                        None => break,
                    },
                }
            }
        });
    }

    /// Client write: advance the clock for `client_id` and replicate to `w`
    /// randomly-chosen replicas. Returns the advanced clock, base64-packed.
    ///
    /// A malformed or absent input clock starts from fresh - an uninformed
    /// writer simply creates a sibling for the clocks to sort out at read
    /// time.
    pub async fn api_write(
        &self,
        key: &str,
        value: &[u8],
        content_type: &str,
        client_id: &str,
        packed_clock: Option<&str>,
    ) -> MecResult<String> {
        let mut clock = packed_clock
            .and_then(|encoded| codec::clock_from_b64(encoded).ok())
            .unwrap_or_else(VectorClock::fresh);
        clock.increment(client_id);

        let msg = write_msg(key, value, content_type, &clock)?;
        let acks = self.fabric.verify_random(self.replication.w, msg).await;
        if acks < self.write_threshold() {
            warn!(
                "write {} got {} of {} acks (threshold {})",
                key,
                acks,
                self.replication.w,
                self.write_threshold()
            );
            return Err(MecError::NotEnoughReplicas(format!(
                "{} of {} replicas acknowledged the write",
                acks, self.replication.w
            )));
        }
        codec::clock_to_b64(&clock)
    }

    fn write_threshold(&self) -> usize {
        if self.replication.strict_write {
            self.replication.w
        } else {
            1
        }
    }

    /// Client read: gather `r` replica responses, detect siblings, repair
    /// stale replicas, and return the winning value (or all siblings) with
    /// the clock to echo back to the client.
    pub async fn api_read(&self, key: &str) -> MecResult<(ReadResult, String)> {
        let responses = self
            .fabric
            .random_responses(self.replication.r, get_msg(key))
            .await;

        // Keep only parseable DATA replies; FAIL and junk drop out here.
        let mut clockmap: BTreeMap<String, VectorClock> = BTreeMap::new();
        let mut datamap: BTreeMap<String, ReadValue> = BTreeMap::new();
        for (peer, frames) in &responses {
            if codec::command_of(true, frames) != Some(Command::Data) {
                continue;
            }
            let Ok(msg) = parse_data_msg(true, frames) else {
                continue;
            };
            datamap.insert(
                peer.clone(),
                ReadValue::from_parts(msg.value, msg.content_type, &msg.clock),
            );
            clockmap.insert(peer.clone(), msg.clock);
        }

        if clockmap.is_empty() {
            return Err(MecError::NotFound(format!("no successful reads for {}", key)));
        }
        if clockmap.len() == 1 {
            let (peer, clock) = clockmap.iter().next().expect("one response");
            let read = datamap.get(peer).cloned().expect("data for response");
            return Ok((ReadResult::Single(read), codec::clock_to_b64(clock)?));
        }

        let latest = vclock::latest(&clockmap);
        let latest_clocks: Vec<VectorClock> = latest.values().cloned().collect();

        if latest.len() > 1 && !vclock::all_equal(&latest_clocks) {
            // Siblings: return every distinct value with the merged clock.
            let merged = VectorClock::merge(&latest_clocks);
            let reads = latest
                .keys()
                .filter_map(|peer| datamap.get(peer).cloned())
                .collect();
            let collapsed = collapse_reads(reads);
            debug!("read {}: {} siblings, clock {}", key, collapsed.len(), merged);
            return Ok((ReadResult::Multi(collapsed), codec::clock_to_b64(&merged)?));
        }

        // One latest clock (or several equal ones): pick any, then push the
        // winning record at every strictly-dominated replica.
        let (peer, clock) = latest.iter().next().expect("non-empty latest");
        let read = datamap.get(peer).cloned().expect("data for latest");
        self.spawn_read_repair(key, &read, clock, vclock::map_outdated(&clockmap));
        Ok((ReadResult::Single(read), codec::clock_to_b64(clock)?))
    }

    /// Best-effort repair writes. Failures are logged and swallowed: the
    /// next read will try again.
    fn spawn_read_repair(
        &self,
        key: &str,
        read: &ReadValue,
        clock: &VectorClock,
        outdated: Vec<String>,
    ) {
        if outdated.is_empty() {
            return;
        }
        let msg = match write_msg(key, &read.value, &read.content_type, clock) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("read-repair for {} not encodable: {}", key, err);
                return;
            }
        };
        for peer in outdated {
            let fabric = self.fabric.clone();
            let msg = msg.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                debug!("read-repair: pushing {} to {}", key, peer);
                if let Err(err) = fabric.request(&peer, msg, REQUEST_TIMEOUT).await {
                    warn!("read-repair of {} at {} failed: {}", key, peer, err);
                }
            });
        }
    }

    /// Inbound WRITE from a coordinating peer: store the record and report
    /// GOOD or FAIL. Unparseable messages are dropped without a reply.
    async fn on_write(&self, frames: Frames) {
        let msg = match parse_data_msg(false, &frames) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("dropping malformed WRITE: {}", err);
                return;
            }
        };
        let record = Record {
            value: msg.value,
            content_type: msg.content_type,
            clock: msg.clock,
        };
        let status = match self.store.put(&msg.key, &record) {
            Ok(()) => Command::Good,
            Err(err) => {
                error!("local write of {} failed: {}", msg.key, err);
                Command::Fail
            }
        };
        let mut reply = vec![frames[0].clone()];
        reply.extend(status_msg(status));
        self.fabric.reply(reply).await;
    }

    /// Inbound GET: reply DATA on a hit, FAIL on a miss, parse failure or
    /// store error.
    async fn on_get(&self, frames: Frames) {
        let Some(prefix) = frames.first().cloned() else {
            return;
        };
        let reply_body = match parse_get_msg(false, &frames) {
            Ok(key) => match self.store.get(&key) {
                Ok(Some(record)) => {
                    data_msg(&key, &record.value, &record.content_type, &record.clock)
                        .unwrap_or_else(|_| status_msg(Command::Fail))
                }
                Ok(None) => status_msg(Command::Fail),
                Err(err) => {
                    error!("local read of {} failed: {}", key, err);
                    status_msg(Command::Fail)
                }
            },
            Err(err) => {
                warn!("malformed GET: {}", err);
                status_msg(Command::Fail)
            }
        };
        let mut reply = vec![prefix];
        reply.extend(reply_body);
        self.fabric.reply(reply).await;
    }
}

/// Drop reads that duplicate an earlier one (same value and content type).
/// Concurrent clocks over identical bytes are not worth a 300.
fn collapse_reads(reads: Vec<ReadValue>) -> Vec<ReadValue> {
    let mut collapsed: Vec<ReadValue> = Vec::new();
    for read in reads {
        if !collapsed.iter().any(|kept| kept.equal_to(&read)) {
            collapsed.push(read);
        }
    }
    collapsed
}
