use bitbucket_exporter::{
    cancel::Cancellation,
    client::models::RefKind,
    collectors::repositories::REPOSITORY_PAGE_PAUSE,
};
use std::time::Instant;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

mod common;

use common::{metric_value, series};

#[tokio::test]
async fn test_full_cycle_over_one_workspace() {
    let server = MockServer::start().await;

    common::mount_repositories(
        &server,
        "acme",
        vec![
            common::repository("acme", "a", "PRJ"),
            common::repository("acme", "b", "PRJ"),
        ],
    )
    .await;
    common::mount_refs(&server, "acme", "a", 2, 0).await;
    common::mount_refs(&server, "acme", "b", 1, 1).await;

    let endpoint = "repositories/acme/a/commits";
    let body = common::page(
        &server,
        endpoint,
        vec![
            common::commit("c1", "{alice}", "Alice"),
            common::commit("c2", "{alice}", "Alice"),
            common::commit("c3", "{bob}", "Bob"),
        ],
        None,
        3,
    );
    common::mount_page(&server, endpoint, 1, body, 1).await;

    common::mount_members(&server, "acme", 12, 1).await;

    let config = common::config(&["*"], &["acme/a"]);
    let (collectors, prom) = common::registry(&server, &config, &["repositories", "refs", "commit", "member"]);

    let mut outcomes = collectors.run_cycle(&Cancellation::never()).await;
    outcomes.sort_by_key(|o| o.collector);
    assert!(outcomes.iter().all(|o| o.success), "{outcomes:?}");
    assert_eq!(outcomes.len(), 4);

    let families = collectors.gather(&prom);

    let branch = |repository| {
        metric_value(
            &families,
            "bitbucket_repository_refs_total_branch",
            &[("workspace", "acme"), ("project", "PRJ"), ("repository", repository)],
        )
    };
    let tag = |repository| {
        metric_value(
            &families,
            "bitbucket_repository_refs_total_tag",
            &[("workspace", "acme"), ("repository", repository)],
        )
    };

    let mut branches = collectors.refs().unwrap().entries(RefKind::Branch);
    branches.sort_by(|l, r| l.repository.cmp(&r.repository));
    let branches: Vec<(&str, u64)> = branches.iter().map(|e| (e.repository.as_str(), e.total)).collect();
    assert_eq!(branches, vec![("a", 2), ("b", 1)]);

    assert_eq!(branch("a"), Some(2.0));
    assert_eq!(tag("a"), Some(0.0));
    assert_eq!(branch("b"), Some(1.0));
    assert_eq!(tag("b"), Some(1.0));

    assert_eq!(
        metric_value(&families, "bitbucket_commit_total", &[("repository", "a")]),
        Some(3.0)
    );
    assert_eq!(series(&families, "bitbucket_commit_total"), 1);

    assert_eq!(
        metric_value(&families, "bitbucket_member_total_commit", &[("user_uuid", "{alice}")]),
        Some(2.0)
    );
    assert_eq!(
        metric_value(&families, "bitbucket_member_total_commit", &[("user_uuid", "{bob}"), ("user", "Bob")]),
        Some(1.0)
    );

    assert_eq!(
        metric_value(&families, "bitbucket_member_total", &[("workspace", "acme")]),
        Some(12.0)
    );

    assert_eq!(series(&families, "bitbucket_repositories_info"), 2);
    assert_eq!(
        metric_value(
            &families,
            "bitbucket_repositories_size",
            &[("name", "A"), ("is_private", "true"), ("has_wiki", "false")]
        ),
        Some(2048.0)
    );

    for collector in ["repositories", "refs", "commit", "member"] {
        assert_eq!(
            metric_value(&families, "bitbucket_scrape_collector_success", &[("collector", collector)]),
            Some(1.0),
            "collector {collector}"
        );
    }
}

#[tokio::test]
async fn test_failed_page_stops_the_walk_and_keeps_earlier_pages() {
    let server = MockServer::start().await;

    common::mount_repositories(&server, "acme", vec![common::repository("acme", "c", "PRJ")]).await;
    common::mount_refs(&server, "acme", "c", 4, 2).await;

    let endpoint = "repositories/acme/c/commits";
    let first = common::page(
        &server,
        endpoint,
        (0..10)
            .map(|i| common::commit(&format!("c{i}"), "{alice}", "Alice"))
            .collect(),
        Some(2),
        50,
    );
    common::mount_page(&server, endpoint, 1, first, 1).await;

    Mock::given(method("GET"))
        .and(path(format!("/{endpoint}")))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    for number in 3..=5 {
        let body = common::page(&server, endpoint, vec![common::commit("x", "{bob}", "Bob")], None, 50);
        common::mount_page(&server, endpoint, number, body, 0).await;
    }

    let config = common::config(&["*"], &["*"]);
    let (collectors, prom) = common::registry(&server, &config, &["refs", "commit"]);

    let mut outcomes = collectors.run_cycle(&Cancellation::never()).await;
    outcomes.sort_by_key(|o| o.collector);

    let summary: Vec<(&str, bool)> = outcomes.iter().map(|o| (o.collector, o.success)).collect();
    assert_eq!(
        summary,
        vec![("commit", false), ("refs", true), ("repositories", true)]
    );

    let families = collectors.gather(&prom);

    assert_eq!(
        metric_value(&families, "bitbucket_commit_total", &[("repository", "c")]),
        Some(10.0)
    );
    assert_eq!(
        metric_value(&families, "bitbucket_scrape_collector_success", &[("collector", "commit")]),
        Some(0.0)
    );
    assert_eq!(
        metric_value(&families, "bitbucket_scrape_collector_errors_total", &[("collector", "commit")]),
        Some(1.0)
    );
    assert_eq!(
        metric_value(&families, "bitbucket_scrape_collector_success", &[("collector", "refs")]),
        Some(1.0)
    );
    assert_eq!(
        metric_value(&families, "bitbucket_repository_refs_total_branch", &[("repository", "c")]),
        Some(4.0)
    );
}

#[tokio::test]
async fn test_member_totals_are_replaced_not_added() {
    let server = MockServer::start().await;
    common::mount_members(&server, "acme", 7, 2).await;

    let config = common::config(&[], &[]);
    let (collectors, prom) = common::registry(&server, &config, &["member"]);

    for _ in 0..2 {
        let outcomes = collectors.run_cycle(&Cancellation::never()).await;
        assert!(outcomes.iter().all(|o| o.success));

        let families = collectors.gather(&prom);
        assert_eq!(
            metric_value(&families, "bitbucket_member_total", &[("workspace", "acme")]),
            Some(7.0)
        );
        assert_eq!(collectors.member().unwrap().total("acme"), Some(7));
    }

    assert_eq!(collectors.cycles(), 2);
}

#[tokio::test]
async fn test_repeated_cycles_do_not_double_count_commits() {
    let server = MockServer::start().await;

    common::mount_repositories(&server, "acme", vec![common::repository("acme", "a", "PRJ")]).await;

    let endpoint = "repositories/acme/a/commits";
    let first = common::page(
        &server,
        endpoint,
        vec![
            common::commit("c1", "{alice}", "Alice"),
            common::commit("c2", "{bob}", "Bob"),
        ],
        Some(2),
        3,
    );
    let second = common::page(&server, endpoint, vec![common::commit("c3", "{alice}", "Alice")], None, 3);
    common::mount_page(&server, endpoint, 1, first, 2).await;
    common::mount_page(&server, endpoint, 2, second, 2).await;

    let config = common::config(&[], &["acme/a"]);
    let (collectors, prom) = common::registry(&server, &config, &["commit"]);

    for _ in 0..2 {
        collectors.run_cycle(&Cancellation::never()).await;
    }

    let families = collectors.gather(&prom);
    assert_eq!(
        metric_value(&families, "bitbucket_commit_total", &[("repository", "a")]),
        Some(3.0)
    );
    assert_eq!(
        metric_value(&families, "bitbucket_member_total_commit", &[("user_uuid", "{alice}")]),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_producer_is_not_exposed_unless_enabled() {
    let server = MockServer::start().await;

    common::mount_repositories(&server, "acme", vec![common::repository("acme", "a", "PRJ")]).await;
    common::mount_refs(&server, "acme", "a", 3, 1).await;

    let config = common::config(&["acme/a"], &[]);
    let (collectors, prom) = common::registry(&server, &config, &["refs"]);

    collectors.run_cycle(&Cancellation::never()).await;

    let families = collectors.gather(&prom);
    assert_eq!(series(&families, "bitbucket_repositories_info"), 0);
    assert_eq!(
        metric_value(&families, "bitbucket_repository_refs_total_branch", &[("repository", "a")]),
        Some(3.0)
    );
}

#[tokio::test]
async fn test_workspace_listing_failure_fails_only_the_producer_and_member() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workspaces/acme/members"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let config = common::config(&["*"], &["*"]);
    let (collectors, prom) = common::registry(&server, &config, &["refs", "commit", "member"]);

    let mut outcomes = collectors.run_cycle(&Cancellation::never()).await;
    outcomes.sort_by_key(|o| o.collector);

    // Consumers see a closed, empty stream and finish cleanly.
    let summary: Vec<(&str, bool)> = outcomes.iter().map(|o| (o.collector, o.success)).collect();
    assert_eq!(
        summary,
        vec![
            ("commit", true),
            ("member", false),
            ("refs", true),
            ("repositories", false)
        ]
    );

    let families = collectors.gather(&prom);
    assert_eq!(
        metric_value(&families, "bitbucket_scrape_collector_success", &[("collector", "repositories")]),
        Some(0.0)
    );
    assert_eq!(series(&families, "bitbucket_member_total"), 0);
}

#[tokio::test]
async fn test_repository_listed_on_two_pages_is_counted_once() {
    let server = MockServer::start().await;

    // A repository created while the listing is walked shifts `a` onto the
    // second page as well.
    let listing = "repositories/acme";
    let first = common::page(
        &server,
        listing,
        vec![
            common::repository("acme", "a", "PRJ"),
            common::repository("acme", "b", "PRJ"),
        ],
        Some(2),
        3,
    );
    let second = common::page(&server, listing, vec![common::repository("acme", "a", "PRJ")], None, 3);
    common::mount_page(&server, listing, 1, first, 1).await;
    common::mount_page(&server, listing, 2, second, 1).await;

    common::mount_refs(&server, "acme", "a", 2, 1).await;
    common::mount_refs(&server, "acme", "b", 1, 0).await;

    let history = "repositories/acme/a/commits";
    let body = common::page(
        &server,
        history,
        (0..5)
            .map(|i| common::commit(&format!("c{i}"), "{alice}", "Alice"))
            .collect(),
        None,
        5,
    );
    common::mount_page(&server, history, 1, body, 1).await;

    let config = common::config(&["*"], &["acme/a"]);
    let (collectors, prom) = common::registry(&server, &config, &["refs", "commit"]);

    let started = Instant::now();
    let outcomes = collectors.run_cycle(&Cancellation::never()).await;
    assert!(outcomes.iter().all(|o| o.success), "{outcomes:?}");
    assert!(started.elapsed() >= REPOSITORY_PAGE_PAUSE);

    let families = collectors.gather(&prom);
    assert_eq!(
        metric_value(&families, "bitbucket_commit_total", &[("repository", "a")]),
        Some(5.0)
    );
    assert_eq!(
        metric_value(&families, "bitbucket_member_total_commit", &[("user_uuid", "{alice}")]),
        Some(5.0)
    );

    let totals = collectors.commit().unwrap().totals();
    assert_eq!(totals.repository_total("{acme-a}"), Some(5));
    assert_eq!(totals.user("{alice}").map(|user| user.total()), Some(5));

    let requests = server.received_requests().await.unwrap();
    let ref_counts_of_a = requests
        .iter()
        .filter(|r| r.url.path() == "/repositories/acme/a/refs")
        .count();
    assert_eq!(ref_counts_of_a, 2, "one branch and one tag count");
    assert_eq!(collectors.refs().unwrap().entries(RefKind::Tag).len(), 2);
}
