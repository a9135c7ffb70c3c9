//! In-memory backend
//!
//! Pools and containers are registered up front; each container holds a
//! flat namespace of byte-vector files. Transfers move data at dispatch and
//! post their completion to the event queue, which hands completions back
//! in shuffled order after an optional delay. Every lifecycle call is
//! counted and any step can be made to fail, which is what the session and
//! engine tests lean on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::status::{ErrorCode, IoOutcome};
use super::types::{
    Completion, ContHandle, EqHandle, Event, FileStat, FsHandle, ObjHandle, ObjectClass,
    OpenOptions, PoolHandle, Rejected, SgList,
};
use super::Backend;
use crate::config::DEFAULT_CHUNK_SIZE;

/// Largest file the store will grow to
const MAX_FILE_SIZE: u64 = 1 << 32;

/// Injectable failure points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Init,
    Fini,
    PoolConnect,
    PoolDisconnect,
    ContOpen,
    ContClose,
    Mount,
    Umount,
    EqCreate,
    EqPoll,
    EventInit,
    /// Read/write dispatch at this offset is refused before queuing
    DispatchAt(u64),
    /// Read/write at this offset is queued but completes with an error
    CompleteAt(u64),
    /// Every completion is posted a second time on a later poll
    DuplicateCompletion,
}

/// Call counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    pub init: u64,
    pub fini: u64,
    pub pool_connect: u64,
    pub pool_disconnect: u64,
    pub cont_open: u64,
    pub cont_close: u64,
    pub mount: u64,
    pub umount: u64,
    pub eq_create: u64,
    pub eq_destroy: u64,
    pub reads: u64,
    pub writes: u64,
}

impl CallStats {
    /// Calls that bring the stack up or down
    pub fn lifecycle_calls(&self) -> u64 {
        self.init
            + self.fini
            + self.pool_connect
            + self.pool_disconnect
            + self.cont_open
            + self.cont_close
            + self.mount
            + self.umount
    }
}

struct FileEntry {
    data: Vec<u8>,
    mode: u32,
    chunk_size: u64,
    class: ObjectClass,
}

struct Pool {
    ranks: Vec<u32>,
    containers: HashMap<Uuid, HashMap<String, FileEntry>>,
}

struct ContEntry {
    poh: u64,
    pool: Uuid,
    cont: Uuid,
}

struct MountEntry {
    coh: u64,
    pool: Uuid,
    cont: Uuid,
}

struct ObjectEntry {
    fs: u64,
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Idle,
    InFlight,
    Done,
}

struct EventEntry {
    eq: u64,
    state: EventState,
}

struct Pending {
    event: Event,
    outcome: IoOutcome,
    /// `None` for a repeated posting
    sgl: Option<SgList>,
    ready_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Read,
    Write,
}

struct MemState {
    init_depth: u32,
    pools: HashMap<Uuid, Pool>,
    pool_handles: HashMap<u64, Uuid>,
    cont_handles: HashMap<u64, ContEntry>,
    mounts: HashMap<u64, MountEntry>,
    objects: HashMap<u64, ObjectEntry>,
    queues: HashMap<u64, Vec<Pending>>,
    events: HashMap<u64, EventEntry>,
    next_id: u64,
    faults: HashMap<Fault, ErrorCode>,
    stats: CallStats,
    rng: fastrand::Rng,
}

impl MemState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fault(&self, fault: Fault) -> Result<(), ErrorCode> {
        match self.faults.get(&fault) {
            Some(code) => Err(*code),
            None => Ok(()),
        }
    }

    fn require_init(&self) -> Result<(), ErrorCode> {
        if self.init_depth == 0 {
            Err(ErrorCode::UNINIT)
        } else {
            Ok(())
        }
    }

    fn namespace(&mut self, fs: u64) -> Result<&mut HashMap<String, FileEntry>, ErrorCode> {
        let mount = self.mounts.get(&fs).ok_or(ErrorCode::NO_HDL)?;
        let (pool, cont) = (mount.pool, mount.cont);
        self.pools
            .get_mut(&pool)
            .and_then(|p| p.containers.get_mut(&cont))
            .ok_or(ErrorCode::NONEXIST)
    }

    fn launch(
        &mut self,
        dir: Transfer,
        fs: FsHandle,
        obj: ObjHandle,
        mut sgl: SgList,
        offset: u64,
        event: &Event,
        delay: Duration,
    ) -> Result<(), Rejected> {
        match dir {
            Transfer::Read => self.stats.reads += 1,
            Transfer::Write => self.stats.writes += 1,
        }

        let launchable = self
            .events
            .get(&event.id)
            .map(|e| e.eq == event.eq.0 && e.state == EventState::Idle)
            .unwrap_or(false);
        if !launchable || !self.queues.contains_key(&event.eq.0) {
            return Err(Rejected {
                code: ErrorCode::INVAL,
                sgl,
            });
        }
        let name = match self.objects.get(&obj.0) {
            Some(o) if o.fs == fs.0 => o.name.clone(),
            _ => {
                return Err(Rejected {
                    code: ErrorCode::NO_HDL,
                    sgl,
                })
            }
        };
        if let Err(code) = self.fault(Fault::DispatchAt(offset)) {
            return Err(Rejected { code, sgl });
        }

        let outcome = match self.fault(Fault::CompleteAt(offset)) {
            Err(code) => Err(code),
            Ok(()) => match self.namespace(fs.0) {
                Err(code) => Err(code),
                Ok(files) => match files.get_mut(&name) {
                    None => Err(ErrorCode::NONEXIST),
                    Some(file) => transfer(dir, &mut file.data, &mut sgl, offset),
                },
            },
        };

        if let Some(entry) = self.events.get_mut(&event.id) {
            entry.state = EventState::InFlight;
        }
        if let Some(queue) = self.queues.get_mut(&event.eq.0) {
            queue.push(Pending {
                event: *event,
                outcome,
                sgl: Some(sgl),
                ready_at: Instant::now() + delay,
            });
        }
        Ok(())
    }
}

/// Move bytes between a file and the segments; returns bytes moved.
///
/// A range past the addressable end is INVAL; a write growing the file past
/// `MAX_FILE_SIZE` is NOMEM. Neither touches the file.
fn transfer(dir: Transfer, data: &mut Vec<u8>, sgl: &mut SgList, offset: u64) -> IoOutcome {
    let total = sgl
        .segments
        .iter()
        .map(|s| s.len.min(s.buf.len()) as u64)
        .sum::<u64>();
    let end = offset.checked_add(total).ok_or(ErrorCode::INVAL)?;
    usize::try_from(end).map_err(|_| ErrorCode::INVAL)?;
    if dir == Transfer::Write && end > MAX_FILE_SIZE {
        return Err(ErrorCode::NOMEM);
    }

    let mut pos = usize::try_from(offset).map_err(|_| ErrorCode::INVAL)?;
    let mut moved = 0usize;
    let mut touched = 0usize;

    for seg in sgl.segments.iter_mut() {
        let len = seg.len.min(seg.buf.len());
        match dir {
            Transfer::Write => {
                if data.len() < pos + len {
                    data.resize(pos + len, 0);
                }
                data[pos..pos + len].copy_from_slice(&seg.buf[..len]);
                moved += len;
            }
            Transfer::Read => {
                if pos >= data.len() {
                    break;
                }
                let n = len.min(data.len() - pos);
                seg.buf[..n].copy_from_slice(&data[pos..pos + n]);
                moved += n;
            }
        }
        pos += len;
        touched += 1;
    }

    sgl.nr_out = touched;
    Ok(moved)
}

/// In-process object store
pub struct MemBackend {
    state: Mutex<MemState>,
    completion_delay: Duration,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    pub fn new() -> Self {
        Self::with_seed(fastrand::u64(..))
    }

    /// Seed the completion-order shuffle
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(MemState {
                init_depth: 0,
                pools: HashMap::new(),
                pool_handles: HashMap::new(),
                cont_handles: HashMap::new(),
                mounts: HashMap::new(),
                objects: HashMap::new(),
                queues: HashMap::new(),
                events: HashMap::new(),
                next_id: 0,
                faults: HashMap::new(),
                stats: CallStats::default(),
                rng: fastrand::Rng::with_seed(seed),
            }),
            completion_delay: Duration::ZERO,
        }
    }

    /// Register a pool (served by `ranks`) holding an empty container
    pub fn with_container(self, pool: Uuid, ranks: Vec<u32>, cont: Uuid) -> Self {
        {
            let mut state = self.state.lock();
            let entry = state.pools.entry(pool).or_insert_with(|| Pool {
                ranks: Vec::new(),
                containers: HashMap::new(),
            });
            for rank in ranks {
                if !entry.ranks.contains(&rank) {
                    entry.ranks.push(rank);
                }
            }
            entry.containers.entry(cont).or_default();
        }
        self
    }

    /// Hold every completion back for `delay` after dispatch
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    /// Make a call fail with `code` until cleared
    pub fn inject(&self, fault: Fault, code: ErrorCode) {
        self.state.lock().faults.insert(fault, code);
    }

    pub fn clear_fault(&self, fault: Fault) {
        self.state.lock().faults.remove(&fault);
    }

    pub fn stats(&self) -> CallStats {
        self.state.lock().stats.clone()
    }

    /// Whether the client stack is currently up
    pub fn is_initialized(&self) -> bool {
        self.state.lock().init_depth > 0
    }

    /// Pool connections currently open
    pub fn open_pools(&self) -> usize {
        self.state.lock().pool_handles.len()
    }

    /// Event queues currently alive
    pub fn open_queues(&self) -> usize {
        self.state.lock().queues.len()
    }

    /// File objects currently open
    pub fn open_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Events initialized and not yet finalized
    pub fn live_events(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Snapshot of a file's bytes
    pub fn file_contents(&self, pool: &Uuid, cont: &Uuid, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .pools
            .get(pool)?
            .containers
            .get(cont)?
            .get(name)
            .map(|f| f.data.clone())
    }

    /// Placement class a file was created with
    pub fn file_class(&self, pool: &Uuid, cont: &Uuid, name: &str) -> Option<ObjectClass> {
        let state = self.state.lock();
        state
            .pools
            .get(pool)?
            .containers
            .get(cont)?
            .get(name)
            .map(|f| f.class)
    }
}

impl Backend for MemBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn init(&self) -> Result<(), ErrorCode> {
        let mut state = self.state.lock();
        state.stats.init += 1;
        state.fault(Fault::Init)?;
        state.init_depth += 1;
        Ok(())
    }

    fn fini(&self) -> Result<(), ErrorCode> {
        let mut state = self.state.lock();
        state.stats.fini += 1;
        state.fault(Fault::Fini)?;
        state.require_init()?;
        state.init_depth -= 1;
        Ok(())
    }

    fn pool_connect(&self, pool: &Uuid, svc_ranks: &[u32]) -> Result<PoolHandle, ErrorCode> {
        let mut state = self.state.lock();
        state.stats.pool_connect += 1;
        state.fault(Fault::PoolConnect)?;
        state.require_init()?;

        let entry = state.pools.get(pool).ok_or(ErrorCode::NONEXIST)?;
        if svc_ranks.is_empty() || svc_ranks.iter().any(|r| !entry.ranks.contains(r)) {
            return Err(ErrorCode::UNREACH);
        }

        let id = state.next_id();
        state.pool_handles.insert(id, *pool);
        debug!("pool {} connected as handle {}", pool, id);
        Ok(PoolHandle(id))
    }

    fn pool_disconnect(&self, poh: PoolHandle) -> Result<(), ErrorCode> {
        let mut state = self.state.lock();
        state.stats.pool_disconnect += 1;
        state.fault(Fault::PoolDisconnect)?;
        if !state.pool_handles.contains_key(&poh.0) {
            return Err(ErrorCode::NO_HDL);
        }
        if state.cont_handles.values().any(|c| c.poh == poh.0) {
            return Err(ErrorCode::BUSY);
        }
        state.pool_handles.remove(&poh.0);
        Ok(())
    }

    fn cont_open(&self, poh: PoolHandle, cont: &Uuid) -> Result<ContHandle, ErrorCode> {
        let mut state = self.state.lock();
        state.stats.cont_open += 1;
        state.fault(Fault::ContOpen)?;

        let pool = *state.pool_handles.get(&poh.0).ok_or(ErrorCode::NO_HDL)?;
        let exists = state
            .pools
            .get(&pool)
            .map(|p| p.containers.contains_key(cont))
            .unwrap_or(false);
        if !exists {
            return Err(ErrorCode::NONEXIST);
        }

        let id = state.next_id();
        state.cont_handles.insert(
            id,
            ContEntry {
                poh: poh.0,
                pool,
                cont: *cont,
            },
        );
        Ok(ContHandle(id))
    }

    fn cont_close(&self, coh: ContHandle) -> Result<(), ErrorCode> {
        let mut state = self.state.lock();
        state.stats.cont_close += 1;
        state.fault(Fault::ContClose)?;
        if !state.cont_handles.contains_key(&coh.0) {
            return Err(ErrorCode::NO_HDL);
        }
        if state.mounts.values().any(|m| m.coh == coh.0) {
            return Err(ErrorCode::BUSY);
        }
        state.cont_handles.remove(&coh.0);
        Ok(())
    }

    fn mount(&self, poh: PoolHandle, coh: ContHandle) -> Result<FsHandle, ErrorCode> {
        let mut state = self.state.lock();
        state.stats.mount += 1;
        state.fault(Fault::Mount)?;

        let (pool, cont) = match state.cont_handles.get(&coh.0) {
            Some(c) if c.poh == poh.0 => (c.pool, c.cont),
            _ => return Err(ErrorCode::NO_HDL),
        };
        let id = state.next_id();
        state.mounts.insert(
            id,
            MountEntry {
                coh: coh.0,
                pool,
                cont,
            },
        );
        Ok(FsHandle(id))
    }

    fn umount(&self, fs: FsHandle) -> Result<(), ErrorCode> {
        let mut state = self.state.lock();
        state.stats.umount += 1;
        state.fault(Fault::Umount)?;
        state
            .mounts
            .remove(&fs.0)
            .map(|_| ())
            .ok_or(ErrorCode::NO_HDL)
    }

    fn open(&self, fs: FsHandle, name: &str, opts: &OpenOptions) -> Result<ObjHandle, ErrorCode> {
        let mut state = self.state.lock();
        if name.is_empty() || name.contains('/') {
            return Err(ErrorCode::INVAL);
        }

        let files = state.namespace(fs.0)?;
        if !files.contains_key(name) {
            if !opts.create {
                return Err(ErrorCode::NONEXIST);
            }
            let chunk_size = if opts.chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                opts.chunk_size
            };
            files.insert(
                name.to_string(),
                FileEntry {
                    data: Vec::new(),
                    mode: opts.mode,
                    chunk_size,
                    class: opts.class,
                },
            );
        }

        let id = state.next_id();
        state.objects.insert(
            id,
            ObjectEntry {
                fs: fs.0,
                name: name.to_string(),
            },
        );
        Ok(ObjHandle(id))
    }

    fn release(&self, obj: ObjHandle) -> Result<(), ErrorCode> {
        self.state
            .lock()
            .objects
            .remove(&obj.0)
            .map(|_| ())
            .ok_or(ErrorCode::NO_HDL)
    }

    fn stat(&self, fs: FsHandle, name: &str) -> Result<FileStat, ErrorCode> {
        let mut state = self.state.lock();
        let files = state.namespace(fs.0)?;
        files
            .get(name)
            .map(|f| FileStat {
                size: f.data.len() as u64,
                mode: f.mode,
                chunk_size: f.chunk_size,
            })
            .ok_or(ErrorCode::NONEXIST)
    }

    fn remove(&self, fs: FsHandle, name: &str) -> Result<(), ErrorCode> {
        let mut state = self.state.lock();
        let files = state.namespace(fs.0)?;
        files.remove(name).map(|_| ()).ok_or(ErrorCode::NONEXIST)
    }

    fn eq_create(&self) -> Result<EqHandle, ErrorCode> {
        let mut state = self.state.lock();
        state.stats.eq_create += 1;
        state.fault(Fault::EqCreate)?;
        state.require_init()?;
        let id = state.next_id();
        state.queues.insert(id, Vec::new());
        Ok(EqHandle(id))
    }

    fn eq_destroy(&self, eq: EqHandle, force: bool) -> Result<usize, ErrorCode> {
        let mut state = self.state.lock();
        state.stats.eq_destroy += 1;

        let unfinished = state.queues.get(&eq.0).ok_or(ErrorCode::NO_HDL)?.len();
        if unfinished > 0 && !force {
            return Err(ErrorCode::BUSY);
        }

        state.queues.remove(&eq.0);
        state.events.retain(|_, e| e.eq != eq.0);
        Ok(unfinished)
    }

    fn eq_poll(
        &self,
        eq: EqHandle,
        max: usize,
        out: &mut Vec<Completion>,
    ) -> Result<usize, ErrorCode> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fault(Fault::EqPoll)?;

        let queue = state.queues.get_mut(&eq.0).ok_or(ErrorCode::NO_HDL)?;
        if max == 0 || queue.is_empty() {
            return Ok(0);
        }

        let now = Instant::now();
        let (mut ready, mut waiting): (Vec<Pending>, Vec<Pending>) =
            queue.drain(..).partition(|p| p.ready_at <= now);
        state.rng.shuffle(&mut ready);
        if ready.len() > max {
            waiting.extend(ready.split_off(max));
        }
        *queue = waiting;

        let duplicate = state.faults.contains_key(&Fault::DuplicateCompletion);
        let mut repeats = Vec::new();
        let delivered = ready.len();
        for pending in ready {
            if let Some(entry) = state.events.get_mut(&pending.event.id) {
                entry.state = EventState::Done;
            }
            if duplicate && pending.sgl.is_some() {
                repeats.push(Pending {
                    event: pending.event,
                    outcome: pending.outcome,
                    sgl: None,
                    ready_at: now,
                });
            }
            out.push(Completion {
                event: pending.event,
                outcome: pending.outcome,
                sgl: pending.sgl,
            });
        }
        if let Some(queue) = state.queues.get_mut(&eq.0) {
            queue.extend(repeats);
        }
        Ok(delivered)
    }

    fn event_init(&self, eq: EqHandle, tag: u64) -> Result<Event, ErrorCode> {
        let mut state = self.state.lock();
        state.fault(Fault::EventInit)?;
        if !state.queues.contains_key(&eq.0) {
            return Err(ErrorCode::NO_HDL);
        }
        let id = state.next_id();
        state.events.insert(
            id,
            EventEntry {
                eq: eq.0,
                state: EventState::Idle,
            },
        );
        Ok(Event { id, eq, tag })
    }

    fn event_fini(&self, event: Event) -> Result<(), ErrorCode> {
        let mut state = self.state.lock();
        match state.events.get(&event.id).map(|e| e.state) {
            None => Err(ErrorCode::NO_HDL),
            Some(EventState::InFlight) => Err(ErrorCode::BUSY),
            Some(_) => {
                state.events.remove(&event.id);
                Ok(())
            }
        }
    }

    fn write(
        &self,
        fs: FsHandle,
        obj: ObjHandle,
        sgl: SgList,
        offset: u64,
        event: &Event,
    ) -> Result<(), Rejected> {
        self.state.lock().launch(
            Transfer::Write,
            fs,
            obj,
            sgl,
            offset,
            event,
            self.completion_delay,
        )
    }

    fn read(
        &self,
        fs: FsHandle,
        obj: ObjHandle,
        sgl: SgList,
        offset: u64,
        event: &Event,
    ) -> Result<(), Rejected> {
        self.state.lock().launch(
            Transfer::Read,
            fs,
            obj,
            sgl,
            offset,
            event,
            self.completion_delay,
        )
    }
}
