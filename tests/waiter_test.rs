use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use element_waiter::{
    ElementSpec, ElementWaiter, MemoryDocument, MemoryElement, MutationSubscription, NodeId,
    ObservableTree, WaitError, WaitMode, WaitRequest, WaitResult, WaiterConfig,
};
use futures::StreamExt;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn append_to_body(doc: &MemoryDocument, spec: ElementSpec) -> NodeId {
    doc.append_child(doc.body(), spec).unwrap()
}

fn document_with_items(count: usize) -> MemoryDocument {
    let doc = MemoryDocument::new();
    for n in 0..count {
        append_to_body(
            &doc,
            ElementSpec::new("div").class("item").attr("data-n", n.to_string()),
        );
    }
    doc
}

#[tokio::test(start_paused = true)]
async fn immediate_match_resolves_without_arming_watchers() {
    let doc = MemoryDocument::new();
    append_to_body(&doc, ElementSpec::new("div").id("a"));
    let waiter = ElementWaiter::new(doc.clone());

    let start = Instant::now();
    let element = waiter.wait_for_one("#a", secs(3)).await.unwrap();

    assert_eq!(element.id(), Some("a"));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(doc.query_count(), 1);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_all_returns_existing_items_in_document_order() {
    let doc = document_with_items(3);
    let waiter = ElementWaiter::new(doc.clone());

    let start = Instant::now();
    let items = waiter.wait_for_all(".item", secs(2)).await.unwrap();

    let order: Vec<_> = items
        .iter()
        .map(|item| item.attribute("data-n").unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["0", "1", "2"]);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_all_returns_a_list_for_a_single_match() {
    let doc = document_with_items(1);
    let waiter = ElementWaiter::new(doc);

    let items = waiter.wait_for_all(".item", secs(2)).await.unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].has_class("item"));
}

#[tokio::test(start_paused = true)]
async fn never_matching_selector_fails_after_retry_budget() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());

    let start = Instant::now();
    let err = waiter.wait_for_one("#a", ms(3000)).await.unwrap_err();

    assert_eq!(
        err,
        WaitError::NotFound {
            selector: "#a".to_string(),
            retries: 3
        }
    );
    assert!(err.to_string().contains("'#a'"));
    assert!(err.to_string().contains("3 retries"));
    assert_eq!(start.elapsed(), secs(3));
    // One fast-path query plus one per tick
    assert_eq!(doc.query_count(), 4);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_below_one_interval_still_terminates() {
    let waiter = ElementWaiter::new(MemoryDocument::new());

    let start = Instant::now();
    let err = waiter.wait_for_one("#a", ms(0)).await.unwrap_err();

    assert_eq!(err.retries(), Some(1));
    assert_eq!(start.elapsed(), secs(1));
}

#[tokio::test(start_paused = true)]
async fn late_insertion_resolves_through_mutation_observer() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());

    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(secs(2)).await;
        append_to_body(&writer, ElementSpec::new("div").id("b"));
    });

    let start = Instant::now();
    let element = waiter.wait_for_one("#b", ms(5000)).await.unwrap();

    assert_eq!(element.id(), Some("b"));
    assert_eq!(element.tag_name(), "div");
    let elapsed = start.elapsed();
    assert!(elapsed >= secs(2) && elapsed < secs(3), "resolved after {elapsed:?}");
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn mutation_between_ticks_resolves_before_next_poll() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());

    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(ms(1500)).await;
        append_to_body(&writer, ElementSpec::new("span").class("late"));
    });

    let start = Instant::now();
    waiter.wait_for_one(".late", secs(5)).await.unwrap();
    assert_eq!(start.elapsed(), ms(1500));
}

#[tokio::test(start_paused = true)]
async fn attribute_change_is_caught_by_polling() {
    let doc = MemoryDocument::new();
    let node = append_to_body(&doc, ElementSpec::new("div").id("c"));
    let waiter = ElementWaiter::new(doc.clone());

    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(ms(1500)).await;
        writer.set_attribute(node, "class", "ready").unwrap();
    });

    let start = Instant::now();
    let element = waiter.wait_for_one(".ready", secs(5)).await.unwrap();

    assert_eq!(element.node_id(), node);
    // Attribute changes do not notify, so the 2s tick finds it
    assert_eq!(start.elapsed(), secs(2));
}

#[tokio::test(start_paused = true)]
async fn wait_for_all_resolves_with_every_late_match() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());

    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(secs(1)).await;
        writer
            .append_child(
                writer.body(),
                ElementSpec::new("ul")
                    .child(ElementSpec::new("li").class("row").attr("data-n", "1"))
                    .child(ElementSpec::new("li").class("row").attr("data-n", "2")),
            )
            .unwrap();
    });

    let rows = waiter.wait_for_all("ul > li.row", secs(5)).await.unwrap();
    let order: Vec<_> = rows.iter().filter_map(|r| r.attribute("data-n")).collect();
    assert_eq!(order, vec!["1", "2"]);
}

#[tokio::test(start_paused = true)]
async fn settled_wait_has_no_further_effect() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());

    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(secs(2)).await;
        append_to_body(&writer, ElementSpec::new("div").id("b"));
    });

    waiter.wait_for_one("#b", secs(5)).await.unwrap();
    let queries = doc.query_count();
    assert_eq!(doc.observer_count(), 0);

    // Neither further mutations nor elapsed ticks may trigger another query
    append_to_body(&doc, ElementSpec::new("div").id("b"));
    tokio::time::advance(secs(10)).await;
    tokio::task::yield_now().await;

    assert_eq!(doc.query_count(), queries);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_disarms_both_watchers() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(ms(1500)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = waiter
        .wait_for_one_cancellable("#never", secs(10), &cancel)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        WaitError::Cancelled {
            selector: "#never".to_string(),
            retries: 1
        }
    );
    assert_eq!(start.elapsed(), ms(1500));
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_does_not_block_an_immediate_match() {
    let doc = document_with_items(2);
    let waiter = ElementWaiter::new(doc);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let items = waiter
        .wait_for_all_cancellable(".item", secs(5), &cancel)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);

    let err = waiter
        .wait_for_all_cancellable(".missing", secs(5), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.retries(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn invalid_selector_fails_without_retrying() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());

    let start = Instant::now();
    let err = waiter.wait_for_one("div >", secs(5)).await.unwrap_err();

    assert!(matches!(err, WaitError::InvalidSelector { .. }));
    assert_eq!(err.selector(), Some("div >"));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn digit_leading_id_or_class_is_invalid() {
    let doc = document_with_items(1);
    let waiter = ElementWaiter::new(doc.clone());

    for selector in ["#1", ".2col", "div.item.0"] {
        let err = waiter.wait_for_all(selector, secs(5)).await.unwrap_err();
        assert!(matches!(err, WaitError::InvalidSelector { .. }), "{selector}: {err:?}");
    }
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_waits_are_independent() {
    let doc = MemoryDocument::new();
    let waiter = ElementWaiter::new(doc.clone());

    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(secs(1)).await;
        append_to_body(&writer, ElementSpec::new("p").id("found"));
    });

    let (found, missing, also_found) = tokio::join!(
        waiter.wait_for_one("#found", secs(5)),
        waiter.wait_for_one("#missing", secs(2)),
        waiter.wait_for_all("p#found", secs(5)),
    );

    assert_eq!(found.unwrap().id(), Some("found"));
    assert_eq!(missing.unwrap_err().retries(), Some(2));
    assert_eq!(also_found.unwrap().len(), 1);
    assert_eq!(doc.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn poll_interval_follows_config() {
    let config = WaiterConfig {
        poll_interval_ms: 250,
        default_timeout_ms: 1000,
        ..WaiterConfig::default()
    };
    let waiter = ElementWaiter::from_config(MemoryDocument::new(), &config);
    assert_eq!(waiter.poll_interval(), ms(250));

    let start = Instant::now();
    let err = waiter.wait_for_one_with_default("#a").await.unwrap_err();

    assert_eq!(err.retries(), Some(4));
    assert_eq!(start.elapsed(), secs(1));
}

#[tokio::test(start_paused = true)]
async fn generic_wait_reports_outcome_shape() {
    let doc = document_with_items(2);
    let waiter = ElementWaiter::new(doc);
    let cancel = CancellationToken::new();

    let one = waiter
        .wait(&WaitRequest::new(".item", WaitMode::One), &cancel)
        .await
        .unwrap();
    assert_eq!(one.len(), 1);

    let all = waiter
        .wait(&WaitRequest::all(".item").with_timeout(secs(1)), &cancel)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

/// Tree whose mutation source ends immediately
struct SilentTree {
    doc: MemoryDocument,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl ObservableTree for SilentTree {
    type Node = MemoryElement;

    async fn query_one(&self, selector: &str) -> WaitResult<Option<MemoryElement>> {
        self.doc.query_one(selector).await
    }

    async fn query_all(&self, selector: &str) -> WaitResult<Vec<MemoryElement>> {
        self.doc.query_all(selector).await
    }

    async fn observe_mutations(&self) -> WaitResult<MutationSubscription> {
        let releases = Arc::clone(&self.releases);
        Ok(
            MutationSubscription::new(futures::stream::empty().boxed()).on_release(move || {
                releases.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }
}

#[tokio::test(start_paused = true)]
async fn polling_continues_when_mutation_source_closes() {
    let doc = MemoryDocument::new();
    let releases = Arc::new(AtomicUsize::new(0));
    let waiter = ElementWaiter::new(SilentTree {
        doc: doc.clone(),
        releases: Arc::clone(&releases),
    });

    let writer = doc.clone();
    tokio::spawn(async move {
        sleep(ms(2500)).await;
        append_to_body(&writer, ElementSpec::new("div").id("late"));
    });

    let start = Instant::now();
    let element = waiter.wait_for_one("#late", secs(5)).await.unwrap();

    assert_eq!(element.id(), Some("late"));
    assert_eq!(start.elapsed(), secs(3));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
