#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};

use plotguard::graph::{
    Character, EventKind, KnowledgeFact, KnowsEdge, Location, PresenceEdge, Scene, StoryEvent,
};
use plotguard::{
    CharacterId, FactId, GraphError, GraphQuery, GraphStore, GraphWrite, InMemoryGraph,
    LocationId, Row, SceneSpan, StoryId, WriteAck,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn t(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(365 * 30) + Duration::seconds(secs)
}

pub fn story(name: &str) -> StoryId {
    StoryId::new(name).unwrap()
}

/// Seeds nodes and edges for one story.
pub struct Seed<'a> {
    pub graph: &'a InMemoryGraph,
    pub story: StoryId,
}

impl<'a> Seed<'a> {
    pub fn new(graph: &'a InMemoryGraph, story_name: &str) -> Self {
        Self {
            graph,
            story: story(story_name),
        }
    }

    pub fn character(&self, name: &str) -> CharacterId {
        let c = Character::new(self.story.clone(), name, t(-1_000_000));
        let id = c.id;
        self.graph.insert(c).unwrap();
        id
    }

    pub fn known_fact(&self, who: CharacterId, content: &str, at: i64) -> FactId {
        let fact = KnowledgeFact::new(self.story.clone(), content, t(at));
        let id = fact.id;
        self.graph.insert(fact).unwrap();
        self.graph
            .insert(KnowsEdge {
                character_id: who,
                fact_id: id,
                learned_at: t(at),
            })
            .unwrap();
        id
    }

    pub fn location(&self, name: &str) -> LocationId {
        let l = Location::new(self.story.clone(), name);
        let id = l.id;
        self.graph.insert(l).unwrap();
        id
    }

    /// Places `who` at `at` for scene positions `[start, end]`.
    pub fn place(&self, who: CharacterId, at: LocationId, start: i64, end: i64) -> FactId {
        let scene = Scene::new(self.story.clone(), at, SceneSpan::new(start, end).unwrap());
        let scene_id = scene.id;
        self.graph.insert(scene).unwrap();
        let fact = KnowledgeFact::new(self.story.clone(), "present in scene", t(start));
        let fact_id = fact.id;
        self.graph.insert(fact).unwrap();
        self.graph
            .insert(PresenceEdge {
                character_id: who,
                scene_id,
                fact_id,
            })
            .unwrap();
        fact_id
    }

    pub fn event(&self, who: CharacterId, kind: EventKind, at: i64) {
        self.graph
            .insert(StoryEvent::new(self.story.clone(), who, kind, t(at)))
            .unwrap();
    }

    /// Alive at 0, dead at 10, no event in between.
    pub fn dead_and_alive(&self, name: &str) -> (FactId, FactId) {
        let who = self.character(name);
        let alive = self.known_fact(who, &format!("{name} is alive"), 0);
        let dead = self.known_fact(who, &format!("{name} is dead"), 10);
        (alive, dead)
    }
}

fn story_of(query: &GraphQuery) -> Option<&StoryId> {
    match query {
        GraphQuery::CharacterKnowledge { story_id, .. }
        | GraphQuery::Relationships { story_id, .. }
        | GraphQuery::Presences { story_id, .. }
        | GraphQuery::Events { story_id }
        | GraphQuery::StoryFacts { story_id, .. } => Some(story_id),
        GraphQuery::Contradictions { story_id, .. } => story_id.as_ref(),
    }
}

/// In-memory graph that can be made to fail on demand.
#[derive(Default)]
pub struct FlakyGraph {
    pub inner: InMemoryGraph,
    down_story: Mutex<Option<StoryId>>,
    broken_query: Mutex<Option<&'static str>>,
}

impl FlakyGraph {
    /// Every read scoped to `story` reports the backend as unreachable.
    pub fn take_down(&self, story: &StoryId) {
        *self.down_story.lock().unwrap() = Some(story.clone());
    }

    pub fn bring_up(&self) {
        *self.down_story.lock().unwrap() = None;
    }

    /// Reads named `name` fail with a backend error.
    pub fn break_query(&self, name: &'static str) {
        *self.broken_query.lock().unwrap() = Some(name);
    }
}

impl GraphStore for FlakyGraph {
    fn query(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        if let (Some(down), Some(target)) = (&*self.down_story.lock().unwrap(), story_of(query)) {
            if down == target {
                return Err(GraphError::Unavailable("connection refused".to_string()));
            }
        }
        if *self.broken_query.lock().unwrap() == Some(query.name()) {
            return Err(GraphError::Backend(format!("{} timed out", query.name())));
        }
        self.inner.query(query)
    }

    fn write(&self, write: GraphWrite) -> Result<WriteAck, GraphError> {
        self.inner.write(write)
    }
}

/// In-memory graph whose next read blocks until released.
pub struct GatedGraph {
    pub inner: InMemoryGraph,
    armed: AtomicBool,
    entered_tx: Sender<()>,
    release_rx: Receiver<()>,
}

pub struct Gate {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

impl GatedGraph {
    pub fn new() -> (Self, Gate) {
        let (entered_tx, entered) = unbounded();
        let (release, release_rx) = unbounded();
        (
            Self {
                inner: InMemoryGraph::new(),
                armed: AtomicBool::new(false),
                entered_tx,
                release_rx,
            },
            Gate { entered, release },
        )
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl GraphStore for GatedGraph {
    fn query(&self, query: &GraphQuery) -> Result<Vec<Row>, GraphError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered_tx.send(());
            let _ = self.release_rx.recv();
        }
        self.inner.query(query)
    }

    fn write(&self, write: GraphWrite) -> Result<WriteAck, GraphError> {
        self.inner.write(write)
    }
}
