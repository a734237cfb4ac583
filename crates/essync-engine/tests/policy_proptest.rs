use std::sync::Arc;

use essync_engine::config::{parser, validator};
use essync_engine::pool::pool_size;
use essync_engine::stats::StatsRegistry;
use essync_types::parse_index_tasks;
use proptest::prelude::*;

fn pipeline_yaml(indices: &[String], pairing: bool, batch_size: usize) -> String {
    format!(
        r#"
version: "1.0"
pipeline: prop_policy
source:
  host: localhost
  port: 9200
destination:
  host: localhost
  port: 9201
indices: [{}]
pairing: {pairing}
resources:
  batch_size: {batch_size}
"#,
        indices.join(", ")
    )
}

proptest! {
    #[test]
    fn pool_size_follows_task_count(tasks in 0_usize..500) {
        let size = pool_size(tasks);
        if tasks == 1 {
            prop_assert_eq!(size, 20);
        } else {
            prop_assert_eq!(size, 2 * tasks + 1);
        }
        prop_assert!(size >= 1);
    }

    #[test]
    fn pairing_requires_even_index_count(len in 1_usize..12) {
        let indices: Vec<String> = (0..len).map(|i| format!("idx{i}")).collect();
        let yaml = pipeline_yaml(&indices, true, 500);
        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let result = validator::validate_pipeline(&config);

        if len % 2 == 0 {
            prop_assert!(result.is_ok());
            let tasks = parse_index_tasks(&indices, true).unwrap();
            prop_assert_eq!(tasks.len(), len / 2);
        } else {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn batch_size_limit_is_enforced(batch_size in 0_usize..20_000) {
        let yaml = pipeline_yaml(&["orders".to_string()], false, batch_size);
        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let result = validator::validate_pipeline(&config);
        prop_assert_eq!(result.is_ok(), batch_size <= validator::MAX_BATCH_SIZE);
    }

    #[test]
    fn concurrent_counters_sum_exactly(
        increments in proptest::collection::vec((0_usize..3, 1_u64..1_000), 1..200),
        threads in 1_usize..6,
    ) {
        let keys = ["a", "b", "c"];
        let registry = Arc::new(StatsRegistry::new(keys));

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let registry = registry.clone();
                let increments = &increments;
                scope.spawn(move || {
                    for (key, n) in increments {
                        registry.add_read(keys[*key], *n);
                        registry.add_write(keys[*key], *n);
                    }
                });
            }
        });

        let threads = threads as u64;
        for (i, key) in keys.iter().enumerate() {
            let expected: u64 = increments.iter().filter(|(k, _)| *k == i).map(|(_, n)| n).sum();
            let snap = registry.get(key).unwrap();
            prop_assert_eq!(snap.read, expected * threads);
            prop_assert_eq!(snap.written, expected * threads);
        }
    }
}
