use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use plotguard::graph::{Character, KnowledgeFact, KnowsEdge, Location, PresenceEdge, Scene};
use plotguard::{ConsistencyEngine, EngineConfig, InMemoryGraph, SceneSpan, StoryId};

const CHARACTERS: u32 = 64;

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(365 * 30) + Duration::seconds(secs)
}

/// A story where every character knows a handful of facts (one dead/alive
/// pair each) and moves between two locations with overlapping scenes.
fn seeded_story() -> (Arc<InMemoryGraph>, StoryId) {
    let graph = Arc::new(InMemoryGraph::new());
    let story = StoryId::new("bench-story").unwrap();
    let harbor = Location::new(story.clone(), "Harbor");
    let castle = Location::new(story.clone(), "Castle");
    let (harbor_id, castle_id) = (harbor.id, castle.id);
    graph.insert(harbor).unwrap();
    graph.insert(castle).unwrap();

    for i in 0..CHARACTERS {
        let name = format!("character-{i}");
        let character = Character::new(story.clone(), &name, t(-1_000_000));
        let who = character.id;
        graph.insert(character).unwrap();

        let statements = [
            format!("{name} is alive"),
            format!("{name} is an ally of the crown"),
            format!("{name} has the key"),
            format!("{name} is dead"),
        ];
        for (at, content) in (0_i64..).step_by(10).zip(statements) {
            let fact = KnowledgeFact::new(story.clone(), content, t(at));
            let fact_id = fact.id;
            graph.insert(fact).unwrap();
            graph
                .insert(KnowsEdge {
                    character_id: who,
                    fact_id,
                    learned_at: t(at),
                })
                .unwrap();
        }

        for (location, start) in [(harbor_id, 1), (castle_id, 2)] {
            let scene = Scene::new(story.clone(), location, SceneSpan::new(start, start + 2).unwrap());
            let scene_id = scene.id;
            graph.insert(scene).unwrap();
            let fact = KnowledgeFact::new(story.clone(), "present in scene", t(start));
            let fact_id = fact.id;
            graph.insert(fact).unwrap();
            graph
                .insert(PresenceEdge {
                    character_id: who,
                    scene_id,
                    fact_id,
                })
                .unwrap();
        }
    }
    (graph, story)
}

fn bench_detect(c: &mut Criterion) {
    let (graph, story) = seeded_story();
    let engine = ConsistencyEngine::new(graph, EngineConfig::default());

    let mut group = c.benchmark_group("detection");
    group.throughput(Throughput::Elements(u64::from(CHARACTERS)));
    group.bench_function("detect_contradictions", |b| {
        b.iter(|| engine.detect_contradictions(&story, None).unwrap());
    });
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    c.bench_function("detection/run_consistency_scan_cold", |b| {
        b.iter_batched(
            || {
                let (graph, story) = seeded_story();
                (ConsistencyEngine::new(graph, EngineConfig::default()), story)
            },
            |(engine, story)| engine.run_consistency_scan(&story, None).unwrap(),
            BatchSize::LargeInput,
        );
    });

    let (graph, story) = seeded_story();
    let engine = ConsistencyEngine::new(graph, EngineConfig::default());
    engine.run_consistency_scan(&story, None).unwrap();
    c.bench_function("detection/run_consistency_scan_warm", |b| {
        b.iter(|| engine.run_consistency_scan(&story, None).unwrap());
    });
}

criterion_group!(detection, bench_detect, bench_scan);
criterion_main!(detection);
