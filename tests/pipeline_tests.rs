//! End-to-end pipeline scenarios against the mock and shell runners.

use std::sync::Arc;

use runnel::{
    CommandRunner, Duplicator, EventKind, FileQueue, FlowError, MockRunner, ParamQueue,
    PipelineGraph, Process, RunState, ShellRunner, Sink, SubstreamAggregator,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Five matched rounds: a parameter queue zipped with a file-path queue
/// and a duplicator-fed shared resource, each round naming its output by
/// the per-round lane parameter.
#[tokio::test]
async fn five_matched_rounds_with_a_shared_reference() {
    init_tracing();
    let lanes = ["1", "2", "4", "7", "8"];

    let mut graph = PipelineGraph::new();

    let mut fetch = Process::from_template(
        "fetch_apps",
        "wget http://example.org/apps.tar.gz -O {o:apps}",
    )
    .unwrap();
    fetch.set_path_static("apps", "data/apps.tar.gz").unwrap();
    graph.add(fetch).unwrap();

    let mut unpack = Process::from_template("unpack_apps", "zcat {i:apps} > {o:tar}").unwrap();
    unpack.set_path_replace("tar", "apps", ".gz", "").unwrap();
    graph.add(unpack).unwrap();

    let mut untar =
        Process::from_template("untar_apps", "tar -xf {i:tar} -C data # {o:appsdir}").unwrap();
    untar.set_path_static("appsdir", "data/apps").unwrap();
    graph.add(untar).unwrap();

    graph
        .add(Duplicator::new("appsdir_copies", lanes.len()).unwrap())
        .unwrap();
    graph.add(ParamQueue::new("lane_ids", lanes).unwrap()).unwrap();
    graph
        .add(
            FileQueue::new(
                "reads",
                lanes
                    .iter()
                    .map(|lane| format!("data/tiny_normal_L00{lane}_R1.fastq.gz")),
            )
            .unwrap(),
        )
        .unwrap();

    let mut align = Process::from_template(
        "align_normal",
        "bwa mem -M {i:reads} > {o:bam} # lane {p:lane} apps {i:appsdir}",
    )
    .unwrap();
    align
        .set_path_custom("bam", |round| {
            format!("tmp/normal_{}.bam", round.value("lane"))
        })
        .unwrap();
    graph.add(align).unwrap();
    graph.add(Sink::new("done").unwrap()).unwrap();

    graph.connect("fetch_apps", "apps", "unpack_apps", "apps").unwrap();
    graph.connect("unpack_apps", "tar", "untar_apps", "tar").unwrap();
    graph
        .connect("untar_apps", "appsdir", "appsdir_copies", "in")
        .unwrap();
    graph
        .connect("appsdir_copies", "out", "align_normal", "appsdir")
        .unwrap();
    graph.connect("lane_ids", "out", "align_normal", "lane").unwrap();
    graph.connect("reads", "out", "align_normal", "reads").unwrap();
    graph.connect("align_normal", "bam", "done", "bams").unwrap();

    let runner = Arc::new(MockRunner::new());
    graph
        .run(Arc::clone(&runner) as Arc<dyn CommandRunner>)
        .await
        .unwrap();
    assert_eq!(graph.state(), RunState::Completed);

    // One invocation per single-shot step, five aligned rounds.
    assert_eq!(runner.count(), 3 + lanes.len());

    let aligns: Vec<String> = runner
        .invocations()
        .into_iter()
        .filter(|(node, _)| node == "align_normal")
        .map(|(_, command)| command)
        .collect();
    assert_eq!(aligns.len(), lanes.len());
    for (lane, command) in lanes.iter().zip(&aligns) {
        assert!(
            command.contains(&format!("tiny_normal_L00{lane}_R1")),
            "round should consume lane {lane}: {command}"
        );
        assert!(
            command.contains(&format!("tmp/normal_{lane}.bam")),
            "output should be named by lane {lane}: {command}"
        );
        assert!(command.contains("apps data/apps"));
    }
}

/// Eleven tagged outputs collapse into two keyed batches and exactly two
/// merge invocations.
#[tokio::test]
async fn grouped_aggregation_merges_once_per_group() {
    init_tracing();
    // 5 normal + 6 tumor, interleaved the way rounds would finish.
    let labels = [
        "normal", "tumor", "normal", "tumor", "normal", "tumor", "normal", "tumor", "normal",
        "tumor", "tumor",
    ];
    let paths: Vec<String> = labels
        .iter()
        .enumerate()
        .map(|(n, label)| format!("tmp/{label}_{n}.bam"))
        .collect();

    let mut graph = PipelineGraph::new();
    graph.add(FileQueue::new("bams", paths.clone()).unwrap()).unwrap();
    graph.add(ParamQueue::new("samples", labels).unwrap()).unwrap();
    graph
        .add(SubstreamAggregator::keyed("by_sample").unwrap())
        .unwrap();

    let mut merge = Process::from_template(
        "merge_bams",
        "samtools merge -f {o:merged} {i:bams|join: } # sample {p:sample}",
    )
    .unwrap();
    merge
        .set_path_custom("merged", |round| {
            format!("tmp/{}.bam", round.value("sample"))
        })
        .unwrap();
    graph.add(merge).unwrap();
    graph.add(Sink::new("done").unwrap()).unwrap();

    graph.connect("bams", "out", "by_sample", "in").unwrap();
    graph.connect("samples", "out", "by_sample", "key").unwrap();
    graph.connect("by_sample", "batch", "merge_bams", "bams").unwrap();
    graph.connect("by_sample", "group", "merge_bams", "sample").unwrap();
    graph.connect("merge_bams", "merged", "done", "merged").unwrap();

    let runner = Arc::new(MockRunner::new());
    graph
        .run(Arc::clone(&runner) as Arc<dyn CommandRunner>)
        .await
        .unwrap();

    let merges = runner.commands();
    assert_eq!(merges.len(), 2, "exactly one merge per group: {merges:?}");

    let normal = &merges[0];
    assert!(normal.contains("-f tmp/normal.bam "), "{normal}");
    assert!(normal.ends_with("# sample normal"), "{normal}");
    assert_eq!(
        paths.iter().filter(|p| normal.contains(*p)).count(),
        5,
        "normal batch joins all 5 normal outputs: {normal}"
    );

    let tumor = &merges[1];
    assert!(tumor.contains("-f tmp/tumor.bam "), "{tumor}");
    assert!(tumor.ends_with("# sample tumor"), "{tumor}");
    assert_eq!(
        paths.iter().filter(|p| tumor.contains(*p)).count(),
        6,
        "tumor batch joins all 6 tumor outputs: {tumor}"
    );
}

/// A single failing round aborts the whole run: the error names the
/// process, the state is Failed, and no sink reports completion.
#[tokio::test]
async fn failing_round_aborts_the_run() {
    init_tracing();
    let lanes = ["1", "2", "4", "7", "8"];

    let mut graph = PipelineGraph::new();
    graph.add(ParamQueue::new("lane_ids", lanes).unwrap()).unwrap();
    graph
        .add(
            FileQueue::new(
                "reads",
                lanes
                    .iter()
                    .map(|lane| format!("data/tiny_normal_L00{lane}_R1.fastq.gz")),
            )
            .unwrap(),
        )
        .unwrap();

    let mut align =
        Process::from_template("align_normal", "bwa mem -M {i:reads} > {o:bam} # {p:lane}")
            .unwrap();
    align
        .set_path_custom("bam", |round| {
            format!("tmp/normal_{}.bam", round.value("lane"))
        })
        .unwrap();
    graph.add(align).unwrap();
    graph.add(Sink::new("done").unwrap()).unwrap();

    graph.connect("lane_ids", "out", "align_normal", "lane").unwrap();
    graph.connect("reads", "out", "align_normal", "reads").unwrap();
    graph.connect("align_normal", "bam", "done", "bams").unwrap();

    let runner = Arc::new(MockRunner::failing_on("L004"));
    let err = graph
        .run(Arc::clone(&runner) as Arc<dyn CommandRunner>)
        .await
        .unwrap_err();

    match &err {
        FlowError::CommandFailed { node, command, .. } => {
            assert_eq!(node, "align_normal");
            assert!(command.contains("L004"), "{command}");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
    assert_eq!(graph.state(), RunState::Failed);

    // Rounds 1 and 2 succeeded, round 3 failed, rounds 4 and 5 never ran.
    assert_eq!(runner.count(), 3);

    let events = graph.event_log();
    let failed = events.graph_events().into_iter().find_map(|e| match e.kind {
        EventKind::GraphFailed { failed_node, .. } => Some(failed_node),
        _ => None,
    });
    assert_eq!(failed.flatten().as_deref(), Some("align_normal"));

    let sink_completed = events
        .filter_node("done")
        .into_iter()
        .any(|e| matches!(e.kind, EventKind::NodeCompleted { .. }));
    assert!(!sink_completed, "no sink completes after a fatal failure");
}

/// A successful run brackets its event log with GraphStarted and
/// GraphCompleted and records a completion per node.
#[tokio::test]
async fn event_log_brackets_a_successful_run() {
    let mut graph = PipelineGraph::new();
    graph
        .add(ParamQueue::new("lanes", ["1", "2"]).unwrap())
        .unwrap();
    graph.add(Sink::new("done").unwrap()).unwrap();
    graph.connect("lanes", "out", "done", "params").unwrap();

    graph.run(Arc::new(MockRunner::new())).await.unwrap();

    let events = graph.event_log().events();
    assert!(matches!(
        events.first().map(|e| &e.kind),
        Some(EventKind::GraphStarted { node_count: 2 })
    ));
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(EventKind::GraphCompleted { .. })
    ));

    for node in ["lanes", "done"] {
        let completed = graph
            .event_log()
            .filter_node(node)
            .into_iter()
            .any(|e| matches!(e.kind, EventKind::NodeCompleted { .. }));
        assert!(completed, "{node} should report completion");
    }

    // IDs are monotonic from zero.
    for (n, event) in events.iter().enumerate() {
        assert_eq!(event.id, n as u64);
    }
}

/// Real shell execution: transform two files through `tr` and check the
/// artifacts on disk.
#[tokio::test]
async fn shell_pipeline_produces_real_files() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = Vec::new();
    for (n, content) in ["first sample", "second sample"].iter().enumerate() {
        let path = dir.path().join(format!("sample_{n}.txt"));
        std::fs::write(&path, content).unwrap();
        inputs.push(path.to_str().unwrap().to_string());
    }

    let mut graph = PipelineGraph::new();
    graph
        .add(FileQueue::new("samples", inputs.clone()).unwrap())
        .unwrap();

    let mut upper = Process::from_template("upcase", "tr a-z A-Z < {i:in} > {o:out}").unwrap();
    upper.set_path_extend("out", "in", ".up").unwrap();
    graph.add(upper).unwrap();
    graph.add(Sink::new("done").unwrap()).unwrap();

    graph.connect("samples", "out", "upcase", "in").unwrap();
    graph.connect("upcase", "out", "done", "outputs").unwrap();

    graph.run(Arc::new(ShellRunner::new())).await.unwrap();
    assert_eq!(graph.state(), RunState::Completed);

    let first = std::fs::read_to_string(format!("{}.up", inputs[0])).unwrap();
    assert_eq!(first, "FIRST SAMPLE");
    let second = std::fs::read_to_string(format!("{}.up", inputs[1])).unwrap();
    assert_eq!(second, "SECOND SAMPLE");
}

/// Shell failure carries the process identity and stderr upward.
#[tokio::test]
async fn shell_failure_is_fatal_with_context() {
    let mut graph = PipelineGraph::new();
    let mut boom = Process::from_template("boom", "echo broken >&2; exit 9 # {o:out}").unwrap();
    boom.set_path_static("out", "never.txt").unwrap();
    graph.add(boom).unwrap();
    graph.add(Sink::new("done").unwrap()).unwrap();
    graph.connect("boom", "out", "done", "outputs").unwrap();

    let err = graph.run(Arc::new(ShellRunner::new())).await.unwrap_err();
    match err {
        FlowError::CommandFailed {
            node,
            status,
            stderr,
            ..
        } => {
            assert_eq!(node, "boom");
            assert_eq!(status, 9);
            assert_eq!(stderr, "broken");
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}
