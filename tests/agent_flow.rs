//! End-to-end coordination flows: an acquisition task walking the full
//! page ladder, and runs stopped by the step and error budgets.

use pagecrew::agent_core::Continuation;
use pagecrew::core_types::{
    ActionResult, ElementDescriptor, PageSnapshot, StateKey, TaskStatus, ThoughtStep,
};
use pagecrew::{Coordinator, CoordinatorConfig};

fn snapshot(url: &str, title: &str, buttons: &[&str]) -> PageSnapshot {
    PageSnapshot {
        url: url.to_owned(),
        title: title.to_owned(),
        clickable_elements: buttons
            .iter()
            .map(|text| ElementDescriptor {
                tag: "button".to_owned(),
                text: (*text).to_owned(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn acquisition_task_walks_the_page_ladder_to_completion() {
    let coordinator = Coordinator::new(CoordinatorConfig::default());
    coordinator.start_task("buy a margherita pizza").await;

    let pages = [
        ("https://shop.example/catalog", "Pizza catalog", 0.2),
        ("https://shop.example/product/margherita", "Margherita", 0.4),
        ("https://shop.example/cart", "Your cart", 0.6),
        ("https://shop.example/checkout", "Checkout", 0.8),
    ];

    for (url, title, expected_progress) in pages {
        let report = coordinator
            .step(snapshot(url, title, &["Continue"]))
            .await
            .unwrap();
        assert_eq!(
            report.reflection.progress_score, expected_progress,
            "progress on {url}"
        );
        assert!(report.continuation.should_continue());
        assert_eq!(report.status, TaskStatus::Running);

        coordinator
            .record_action_result(ActionResult::ok(&report.step.action))
            .await
            .unwrap();
    }

    let done = coordinator
        .step(snapshot(
            "https://shop.example/confirmation",
            "Order confirmed",
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(done.reflection.progress_score, 1.0);
    assert!(done.reflection.next_action.is_none());
    assert_eq!(done.continuation, Continuation::Completed);
    assert_eq!(done.status, TaskStatus::Completed);

    let chain: Vec<ThoughtStep> = coordinator
        .state()
        .get_as(StateKey::ThoughtChain)
        .unwrap();
    assert_eq!(chain.len(), 5);
    assert_eq!(chain.last().unwrap().step_number, 5);

    let summary = coordinator.summary().await;
    assert_eq!(summary["run"]["completed"], serde_json::json!(true));
}

#[tokio::test]
async fn step_budget_stops_a_task_that_makes_no_progress() {
    let config = CoordinatorConfig {
        max_steps: 3,
        ..Default::default()
    };
    let coordinator = Coordinator::new(config);
    coordinator.start_task("buy a margherita pizza").await;

    let page = snapshot("https://shop.example/catalog", "Pizza catalog", &["More"]);
    for _ in 0..2 {
        let report = coordinator.step(page.clone()).await.unwrap();
        assert!(report.continuation.should_continue());
    }

    let last = coordinator.step(page).await.unwrap();
    assert_eq!(last.continuation, Continuation::StepBudgetExhausted);
    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.step.step_number, 3);
}

#[tokio::test]
async fn error_budget_stops_a_task_whose_actions_keep_failing() {
    let config = CoordinatorConfig {
        max_errors: 2,
        ..Default::default()
    };
    let coordinator = Coordinator::new(config);
    coordinator.start_task("buy a margherita pizza").await;

    let page = snapshot("https://shop.example/catalog", "Pizza catalog", &["Order"]);

    coordinator.step(page.clone()).await.unwrap();
    coordinator
        .record_action_result(ActionResult::failed("click", "element not found: order"))
        .await
        .unwrap();

    let second = coordinator.step(page.clone()).await.unwrap();
    assert!(!second.reflection.action_successful);
    assert!(second.continuation.should_continue());

    coordinator
        .record_action_result(ActionResult::failed("click", "element not found: order"))
        .await
        .unwrap();
    let third = coordinator.step(page).await.unwrap();
    assert_eq!(third.continuation, Continuation::ErrorBudgetExhausted);
    assert_eq!(third.status, TaskStatus::Failed);

    // Both failures were analyzed and recorded.
    let errors: Vec<serde_json::Value> = coordinator
        .state()
        .get_as(StateKey::ErrorHistory)
        .unwrap();
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn failed_actions_surface_as_warnings_in_the_instruction() {
    let coordinator = Coordinator::new(CoordinatorConfig::default());
    coordinator.start_task("buy a margherita pizza").await;

    coordinator
        .step(snapshot(
            "https://shop.example/catalog",
            "Pizza catalog",
            &["Order"],
        ))
        .await
        .unwrap();
    coordinator
        .record_action_result(ActionResult::failed("click", "timeout waiting for element"))
        .await
        .unwrap();

    let rendered = coordinator.render_instruction("Buy a margherita pizza");
    assert!(rendered.contains("### Important:"));
    assert!(rendered.contains("timeout waiting for element"));
}
