//! Fan-out/merge pipeline.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

use super::{AddonRegistry, Operation};
use crate::error::Error;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "addon panicked".to_string())
}

/// Run `Op` on every capable addon and fold their results into `baseline`.
///
/// Addons run one after another in registration order. An addon that fails
/// or panics is logged and skipped; the others still contribute.
pub async fn process<Op, F>(
    registry: &AddonRegistry,
    baseline: Op::Output,
    args: &Op::Args,
    mut merge: F,
) -> Op::Output
where
    Op: Operation,
    F: FnMut(Op::Output, Op::Output) -> Op::Output,
{
    let providers = registry.get_by_operation::<Op>();
    debug!(
        operation = Op::NAME,
        addons = providers.len(),
        "Processing operation with addons"
    );

    let mut processed = baseline;
    for (name, provider) in providers {
        let outcome = AssertUnwindSafe(provider.invoke(args)).catch_unwind().await;

        let err = match outcome {
            Ok(Ok(result)) => {
                processed = merge(processed, result);
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        let err = Error::AddonInvocation {
            addon: name,
            operation: Op::NAME,
            message: err,
        };
        error!(error = %err, "Error in addon");
    }

    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::{
        Addon, Capabilities, ItemGroup, MergeResult, Provides, Search, SearchQuery,
        standard_list_merge,
    };
    use crate::error::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    enum Behavior {
        Items(&'static str),
        Fail,
        Panic,
    }

    struct Scripted {
        behavior: Behavior,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Provides<Search> for Scripted {
        async fn invoke(&self, args: &SearchQuery) -> Result<MergeResult> {
            self.seen.lock().push(args.keywords.clone());
            match self.behavior {
                Behavior::Items(item) => Ok(MergeResult::from([(
                    "tracks".to_string(),
                    ItemGroup::new(vec![json!(item)], 1),
                )])),
                Behavior::Fail => Err(Error::Other("upstream down".into())),
                Behavior::Panic => panic!("addon bug"),
            }
        }
    }

    impl Addon for Scripted {
        fn declare(self: Arc<Self>, capabilities: &mut Capabilities) {
            capabilities.provide::<Search>(self);
        }
    }

    fn registry(behaviors: Vec<(&str, Behavior)>) -> (AddonRegistry, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = AddonRegistry::new();
        for (name, behavior) in behaviors {
            registry.register(
                name,
                Arc::new(Scripted {
                    behavior,
                    seen: seen.clone(),
                }),
            );
        }
        (registry, seen)
    }

    fn baseline() -> MergeResult {
        MergeResult::from([("tracks".to_string(), ItemGroup::new(vec![json!("base")], 1))])
    }

    #[tokio::test]
    async fn test_no_addons_returns_baseline() {
        let (registry, _) = registry(vec![]);
        let out = process::<Search, _>(
            &registry,
            baseline(),
            &SearchQuery::new("x"),
            standard_list_merge,
        )
        .await;
        assert_eq!(out, baseline());
    }

    #[tokio::test]
    async fn test_failing_addon_is_skipped() {
        let (registry, seen) = registry(vec![
            ("a", Behavior::Items("a")),
            ("b", Behavior::Fail),
            ("c", Behavior::Items("c")),
        ]);

        let out = process::<Search, _>(
            &registry,
            baseline(),
            &SearchQuery::new("lofi"),
            standard_list_merge,
        )
        .await;

        assert_eq!(
            out["tracks"].items,
            vec![json!("base"), json!("a"), json!("c")]
        );
        assert_eq!(out["tracks"].total_items, 3);
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_panicking_addon_is_skipped() {
        let (registry, _) = registry(vec![("a", Behavior::Panic), ("b", Behavior::Items("b"))]);

        let out = process::<Search, _>(
            &registry,
            baseline(),
            &SearchQuery::new("x"),
            standard_list_merge,
        )
        .await;

        assert_eq!(out["tracks"].items, vec![json!("base"), json!("b")]);
    }

    #[tokio::test]
    async fn test_custom_merge_sees_registration_order() {
        let (registry, _) = registry(vec![
            ("z", Behavior::Items("z")),
            ("a", Behavior::Items("a")),
        ]);

        let mut order = Vec::new();
        process::<Search, _>(
            &registry,
            MergeResult::new(),
            &SearchQuery::new("x"),
            |acc, r| {
                order.push(r["tracks"].items[0].clone());
                standard_list_merge(acc, r)
            },
        )
        .await;

        assert_eq!(order, vec![json!("z"), json!("a")]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "addon panicked");
    }
}
