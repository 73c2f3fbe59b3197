//! Daemon scenarios over a real data directory

use std::time::Duration;

use cvfs_core::{Config, Metadata};
use cvfs_daemon::{CvfsDaemon, FinalState, Phase, SearchMethod};
use cvfs_vpl::VplValue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tempfile::TempDir;

fn config(tmp: &TempDir) -> Config {
    let mut config = Config::for_data_dir(tmp.path());
    config.daemon.sleep_interval = Duration::from_secs(60);
    config
}

fn meta(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap()
}

fn random_vec(rng: &mut StdRng, dim: usize) -> Vec<f64> {
    (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn fill(daemon: &mut CvfsDaemon, rng: &mut StdRng, range: std::ops::Range<usize>, dim: usize) {
    for i in range {
        daemon
            .engine_mut()
            .put(&format!("doc_{}", i), random_vec(rng, dim), Metadata::new())
            .unwrap();
    }
}

fn ids(names: &[&str]) -> VplValue {
    VplValue::from_ids(names.iter().copied())
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_semantic_search_query_through_graph() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(&tmp);
    cfg.daemon.hnsw_rebuild_every = 10;
    let mut daemon = CvfsDaemon::open(cfg).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    fill(&mut daemon, &mut rng, 0..20, 4);

    let report = daemon.run_optimization_cycle().unwrap();
    assert!(report.hnsw_rebuilt);
    assert!(daemon.state().hnsw_built);

    let target = daemon.engine().get("doc_3").unwrap().unwrap().vector;
    let response = daemon.process_vector_query(target, "semantic_search", 5, None);

    assert!(response.is_ok());
    assert!(response.statement_errors.is_empty(), "{:?}", response.statement_errors);
    assert!(response.query_id.starts_with("query_"));
    assert_eq!(response.result_count, 5);
    match &response.results {
        VplValue::List(items) => assert_eq!(items[0], VplValue::Id("doc_3".into())),
        other => panic!("unexpected results {:?}", other),
    }

    let log = std::fs::read_to_string(tmp.path().join("operations.log")).unwrap();
    assert!(log.contains("V-HNSW-BUILD 20 nodes"));
    assert!(log.contains(&format!("\"query_id\":\"{}\"", response.query_id)));
    assert!(log.contains("\"result_count\":5"));
}

#[test]
fn test_query_without_graph_scans_the_store() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    for (id, v) in [("a", [0.0, 1.0]), ("b", [1.0, 0.0]), ("c", [0.0, 0.0])] {
        daemon.engine_mut().put(id, v.to_vec(), Metadata::new()).unwrap();
    }
    assert!(!daemon.state().hnsw_built);

    let response = daemon.query(vec![0.9, 0.0], 2);
    assert!(response.is_ok());
    assert!(response.statement_errors.is_empty(), "{:?}", response.statement_errors);
    assert_eq!(response.results, ids(&["b", "c"]));
    assert_eq!(response.result_count, 2);

    let response = daemon.process_vector_query(vec![0.0, 0.9], "hybrid_search", 1, None);
    assert_eq!(response.results, ids(&["a"]));
}

#[test]
fn test_failed_query_reports_error_kind() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    daemon.engine_mut().put("a", vec![0.0, 1.0], Metadata::new()).unwrap();

    let response = daemon.process_vector_query(vec![1.0, 2.0, 3.0], "semantic_search", 3, None);
    assert!(!response.is_ok());
    assert_eq!(response.error.as_ref().unwrap().kind, "DIMENSION_MISMATCH");
    assert_eq!(response.results, VplValue::empty_list());
    assert_eq!(daemon.state().queries_processed, 1);
}

#[test]
fn test_semantic_search_falls_back_to_brute_force() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    for (id, v) in [("a", [0.0, 0.0]), ("b", [1.0, 0.0]), ("c", [0.0, 1.0]), ("temp_1", [0.9, 0.0])] {
        daemon.engine_mut().put(id, v.to_vec(), Metadata::new()).unwrap();
    }

    let response = daemon.semantic_search(&[0.9, 0.1], 2, true).unwrap();
    assert_eq!(response.method, SearchMethod::BruteForce);
    assert_eq!(response.vectors_searched, Some(3));
    let found: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(found, vec!["b", "a"]);

    daemon.build_hnsw_index().unwrap();
    let response = daemon.semantic_search(&[0.9, 0.1], 2, true).unwrap();
    assert_eq!(response.method, SearchMethod::Hnsw);
    assert_eq!(response.results[0].id, "b");

    let response = daemon.semantic_search(&[0.9, 0.1], 2, false).unwrap();
    assert_eq!(response.method, SearchMethod::BruteForce);
}

#[test]
fn test_empty_graph_falls_back_to_brute_force() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    assert_eq!(daemon.build_hnsw_index().unwrap(), 0);
    daemon.engine_mut().put("a", vec![0.0, 0.0], Metadata::new()).unwrap();
    daemon.engine_mut().put("b", vec![1.0, 0.0], Metadata::new()).unwrap();

    let response = daemon.semantic_search(&[0.9, 0.0], 2, true).unwrap();
    assert_eq!(response.method, SearchMethod::BruteForce);
    let found: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(found, vec!["b", "a"]);

    let response = daemon.query(vec![0.9, 0.0], 1);
    assert_eq!(response.results, ids(&["b"]));
}

#[test]
fn test_graph_search_after_restart_with_deleted_entry_node() {
    let tmp = TempDir::new().unwrap();
    {
        let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
        for i in 0..5 {
            daemon
                .engine_mut()
                .put(&format!("v{}", i), vec![i as f64, 0.0], Metadata::new())
                .unwrap();
        }
        daemon.build_hnsw_index().unwrap();
        assert!(daemon.engine_mut().delete("v0").unwrap());
    }

    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    assert_eq!(daemon.engine().hnsw().unwrap().len(), 4);

    let response = daemon.semantic_search(&[2.2, 0.0], 2, true).unwrap();
    assert_eq!(response.method, SearchMethod::Hnsw);
    let found: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(found, vec!["v2", "v3"]);
}

#[test]
fn test_hybrid_search_filters_on_metadata() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    let docs = [
        ("d0", [0.0, 0.0], "en"),
        ("d1", [0.1, 0.0], "de"),
        ("d2", [0.2, 0.0], "en"),
        ("d3", [5.0, 5.0], "en"),
        ("d4", [0.0, 0.3], "fr"),
    ];
    for (id, v, lang) in docs {
        daemon
            .engine_mut()
            .put(id, v.to_vec(), meta(json!({ "lang": lang })))
            .unwrap();
    }
    daemon.build_hnsw_index().unwrap();

    let response =
        daemon.process_vector_query(vec![0.0, 0.0], "hybrid_search", 10, Some(r#"{"lang": "en"}"#));
    assert!(response.statement_errors.is_empty(), "{:?}", response.statement_errors);
    assert_eq!(response.results, ids(&["d0", "d2", "d3"]));

    let response = daemon.process_vector_query(vec![0.0, 0.0], "hybrid_search", 2, None);
    assert_eq!(response.results, ids(&["d0", "d1"]));
}

#[test]
fn test_concept_cluster_returns_partition_members() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    for (id, v) in [("a", [0.0, 0.0]), ("b", [0.1, 0.0]), ("c", [5.0, 5.0]), ("d", [5.1, 5.0])] {
        daemon.engine_mut().put(id, v.to_vec(), Metadata::new()).unwrap();
    }
    assert_eq!(daemon.build_ivf_partitions(2).unwrap(), 2);

    let response = daemon.process_vector_query(vec![5.0, 5.0], "concept_cluster", 10, None);
    assert!(response.statement_errors.is_empty(), "{:?}", response.statement_errors);
    assert_eq!(response.results, ids(&["b", "c", "d"]));
}

#[test]
fn test_unknown_query_type_uses_semantic_search() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    daemon.engine_mut().put("a", vec![0.0, 1.0], Metadata::new()).unwrap();
    daemon.engine_mut().put("b", vec![1.0, 0.0], Metadata::new()).unwrap();
    daemon.build_hnsw_index().unwrap();

    let response = daemon.process_vector_query(vec![0.9, 0.0], "no_such_program", 1, None);
    assert_eq!(response.results, ids(&["b"]));
}

// ============================================================================
// Optimization cycle
// ============================================================================

#[test]
fn test_cycle_purges_only_scratch_vectors() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    for id in ["doc_1", "temp_x", "dist_y", "query_z", "my_query", "tempo"] {
        daemon.engine_mut().put(id, vec![1.0], Metadata::new()).unwrap();
    }

    let report = daemon.run_optimization_cycle().unwrap();
    assert_eq!(report.purged, 3);
    assert_eq!(report.vector_count, 3);
    assert_eq!(
        daemon.engine().store().ids(),
        vec!["doc_1".to_string(), "my_query".to_string(), "tempo".to_string()]
    );
}

#[test]
fn test_rebuilds_follow_watermarks() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(&tmp);
    cfg.daemon.hnsw_rebuild_every = 5;
    cfg.daemon.ivf_rebuild_every = 10;
    cfg.daemon.pq_rebuild_every = 10;
    cfg.index.ivf.k = 2;
    let mut daemon = CvfsDaemon::open(cfg).unwrap();
    let mut rng = StdRng::seed_from_u64(11);

    fill(&mut daemon, &mut rng, 0..5, 4);
    let report = daemon.run_optimization_cycle().unwrap();
    assert!(report.hnsw_rebuilt && !report.ivf_rebuilt && !report.pq_rebuilt);

    fill(&mut daemon, &mut rng, 5..10, 4);
    let report = daemon.run_optimization_cycle().unwrap();
    assert!(report.hnsw_rebuilt && report.ivf_rebuilt && report.pq_rebuilt);
    assert!(tmp.path().join("graph.txt").exists());
    assert!(tmp.path().join("ivf_partitions.txt").exists());
    assert!(tmp.path().join("codebooks.txt").exists());

    let report = daemon.run_optimization_cycle().unwrap();
    assert!(!report.hnsw_rebuilt && !report.ivf_rebuilt && !report.pq_rebuilt);
}

#[test]
fn test_approximate_distance_builds_missing_codebook() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(&tmp);
    cfg.index.pq.subspace_count = 2;
    let mut daemon = CvfsDaemon::open(cfg).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    fill(&mut daemon, &mut rng, 0..8, 4);

    assert!(!daemon.engine().codebooks().contains("default"));
    let (total, codes) = daemon.approximate_distance("default", &[0.0; 4]).unwrap();
    assert!(total >= 0.0);
    assert_eq!(codes.len(), 2);
    assert!(daemon.state().pq_built);
    assert!(tmp.path().join("codebooks.txt").exists());
}

#[test]
fn test_pending_queries_are_drained() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    daemon.engine_mut().put("a", vec![0.0, 0.0], Metadata::new()).unwrap();
    daemon.engine_mut().put("b", vec![1.0, 1.0], Metadata::new()).unwrap();
    daemon.build_hnsw_index().unwrap();

    let pending = tmp.path().join("pending_queries.txt");
    std::fs::write(
        &pending,
        "{\"vector\": [0.0, 0.1], \"top_k\": 1}\n{\"vector\": [1.0, 0.0, 5.0]}\ngarbage\n",
    )
    .unwrap();

    assert_eq!(daemon.process_pending_queries().unwrap(), 3);
    assert_eq!(daemon.state().queries_processed, 2);

    let processed = std::fs::read_to_string(tmp.path().join("processed_queries.txt")).unwrap();
    let entries: Vec<serde_json::Value> = processed
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["status"], "processed");
    assert_eq!(entries[0]["results"]["results"], json!(["a"]));
    assert_eq!(entries[1]["status"], "error");
    assert!(entries[1]["error"].as_str().unwrap().starts_with("DIMENSION_MISMATCH"));
    assert_eq!(entries[2]["query"], "garbage");
    assert_eq!(std::fs::read_to_string(&pending).unwrap(), "# Processed queries\n");

    // The stored query vector is scratch data and goes on the next cycle.
    daemon.run_optimization_cycle().unwrap();
    assert!(daemon.engine().store().ids().iter().all(|id| !id.starts_with("query_")));
}

#[test]
fn test_cycle_walks_the_phases() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    daemon.run_cycle().unwrap();
    daemon.run_cycle().unwrap();
    assert_eq!(daemon.state().phase, Phase::Idle);
    assert_eq!(daemon.state().cycles_completed, 2);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_restart_reloads_indexes_and_programs() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(&tmp);
    cfg.daemon.hnsw_rebuild_every = 10;
    {
        let mut daemon = CvfsDaemon::open(cfg.clone()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        fill(&mut daemon, &mut rng, 0..12, 3);
        daemon.build_hnsw_index().unwrap();
    }
    std::fs::write(tmp.path().join("programs").join("count_all.vpl"), "RETURN LEN(LOAD_ALL())\n").unwrap();

    let mut daemon = CvfsDaemon::open(cfg).unwrap();
    assert!(daemon.state().hnsw_built);
    assert_eq!(daemon.engine().hnsw().unwrap().len(), 12);
    assert!(daemon.programs().get("count_all").is_some());

    let report = daemon.run_optimization_cycle().unwrap();
    assert!(!report.hnsw_rebuilt);

    let response = daemon.process_vector_query(vec![0.0, 0.0, 0.0], "count_all", 1, None);
    assert_eq!(response.results, VplValue::Scalar(12.0));
}

#[tokio::test]
async fn test_run_writes_final_state_on_shutdown() {
    let tmp = TempDir::new().unwrap();
    let mut daemon = CvfsDaemon::open(config(&tmp)).unwrap();
    daemon.engine_mut().put("a", vec![1.0, 2.0], Metadata::new()).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tx.send(()).unwrap();
    let state = daemon
        .run(async {
            let _ = rx.await;
        })
        .await
        .unwrap();

    assert_eq!(state.vectors_count, 1);
    assert!(!state.hnsw_built);
    assert_eq!(daemon.state().cycles_completed, 1);

    let written: FinalState =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("daemon_state.txt")).unwrap()).unwrap();
    assert_eq!(written, state);
}
