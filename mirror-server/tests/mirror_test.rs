//! End-to-end mirroring against a scripted upstream feed.

mod common;

use axum::http::StatusCode;
use common::{create_test_server, create_test_setup, FakeFeed};
use mirror_server::{PackageId, PackageVersion};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn versions_combine_upstream_and_local() {
    let feed = FakeFeed::start().await;
    feed.versions("Shared.Lib", &["1.0.0", "2.0.0"]).await;

    let (server, _setup) =
        create_test_server(Some(feed.service_index()), &[("Shared.Lib", "1.5.0")]).await;

    let response = server.get("/v3/package/shared.lib/index.json").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["versions"], json!(["1.0.0", "1.5.0", "2.0.0"]));
}

#[tokio::test]
async fn first_download_mirrors_and_second_is_served_locally() {
    let feed = FakeFeed::start().await;
    feed.package("Remote.Lib", "1.0.0", 1).await;

    let (server, setup) = create_test_server(Some(feed.service_index()), &[]).await;
    let url = "/v3/package/remote.lib/1.0.0/remote.lib.1.0.0.nupkg";

    let first = server.get(url).await;
    first.assert_status_ok();
    assert!(first.as_bytes().starts_with(b"PK"));

    let second = server.get(url).await;
    second.assert_status_ok();
    assert_eq!(first.as_bytes(), second.as_bytes());

    let id = PackageId::new("Remote.Lib");
    let version: PackageVersion = "1.0.0".parse().unwrap();
    assert!(setup.app_state.packages.exists(&id, &version).await.unwrap());

    feed.server.verify().await;
}

#[tokio::test]
async fn concurrent_requests_download_once() {
    let feed = FakeFeed::start().await;
    feed.package("Busy.Lib", "3.1.0", 1).await;

    let setup = create_test_setup(Some(feed.service_index()), &[])
        .await
        .unwrap();
    let id = PackageId::new("Busy.Lib");
    let version: PackageVersion = "3.1.0".parse().unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let mirror = setup.app_state.mirror.clone();
        let (id, version) = (id.clone(), version.clone());
        handles.push(tokio::spawn(async move {
            mirror.mirror(&id, &version, &CancellationToken::new()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(setup.app_state.packages.exists(&id, &version).await.unwrap());
    feed.server.verify().await;
}

#[tokio::test]
async fn package_missing_everywhere_is_not_found() {
    let feed = FakeFeed::start().await;
    let (server, _setup) = create_test_server(Some(feed.service_index()), &[]).await;

    server
        .get("/v3/package/ghost/1.0.0/ghost.1.0.0.nupkg")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/v3/package/ghost/index.json")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registration_comes_from_upstream_metadata() {
    let feed = FakeFeed::start().await;
    feed.registration(
        "Remote.Lib",
        json!([
            {
                "id": "Remote.Lib",
                "version": "1.0.0",
                "authors": ["Alice", "Bob"],
                "description": "First release",
                "published": "2023-01-02T03:04:05+00:00",
                "dependencyGroups": [{
                    "targetFramework": "net8.0",
                    "dependencies": [{ "id": "Dep.One", "range": "[1.0.0, )" }]
                }]
            },
            {
                "id": "Remote.Lib",
                "version": "2.0.0",
                "authors": "Alice",
                "description": "Second release"
            }
        ]),
    )
    .await;

    let (server, _setup) = create_test_server(Some(feed.service_index()), &[]).await;

    let response = server.get("/v3/registration/remote.lib/index.json").await;
    response.assert_status_ok();

    let body: Value = response.json();
    let page = &body["items"][0];
    assert_eq!(page["count"], 2);
    assert_eq!(page["lower"], "1.0.0");
    assert_eq!(page["upper"], "2.0.0");

    let first = &page["items"][0]["catalogEntry"];
    assert_eq!(first["description"], "First release");
    assert_eq!(
        first["packageContent"],
        "http://localhost:5000/v3/package/remote.lib/1.0.0/remote.lib.1.0.0.nupkg"
    );
    assert_eq!(
        first["dependencyGroups"],
        json!([{
            "targetFramework": "net8.0",
            "dependencies": [{ "id": "Dep.One", "range": "[1.0.0, )" }]
        }])
    );
}

#[tokio::test]
async fn registration_survives_odd_upstream_entries() {
    let feed = FakeFeed::start().await;
    feed.registration(
        "Odd.Lib",
        json!([
            {
                "id": "Odd.Lib",
                "version": "1.0.0",
                "requireLicenseAcceptance": null,
                "dependencyGroups": [{ "targetFramework": "net6.0", "dependencies": null }]
            },
            { "id": "Odd.Lib", "version": "1.1.0", "published": "garbage" }
        ]),
    )
    .await;

    let (server, _setup) = create_test_server(Some(feed.service_index()), &[]).await;

    let response = server.get("/v3/registration/odd.lib/index.json").await;
    response.assert_status_ok();

    let body: Value = response.json();
    let page = &body["items"][0];
    assert_eq!(page["count"], 1);
    let entry = &page["items"][0]["catalogEntry"];
    assert_eq!(entry["version"], "1.0.0");
    assert_eq!(entry["requireLicenseAcceptance"], false);
    assert_eq!(
        entry["dependencyGroups"],
        json!([{ "targetFramework": "net6.0", "dependencies": [] }])
    );
}

#[tokio::test]
async fn search_merges_upstream_with_local() {
    let feed = FakeFeed::start().await;
    feed.search(json!([
        { "id": "Json.Tools", "version": "4.0.0", "totalDownloads": 500 },
        { "id": "Json.Extras", "version": "1.0.0", "totalDownloads": 10 }
    ]))
    .await;

    let (server, _setup) = create_test_server(
        Some(feed.service_index()),
        &[("Json.Tools", "1.0.0"), ("Json.Local", "0.1.0")],
    )
    .await;

    let response = server.get("/v3/search").add_query_param("q", "json").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["totalHits"], 3);
    assert!(body.get("@context").is_none());

    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["Json.Local", "Json.Tools", "Json.Extras"]);

    // The upstream entry has more downloads, so it takes the local slot.
    assert_eq!(body["data"][1]["version"], "4.0.0");
    assert_eq!(body["data"][1]["totalDownloads"], 500);
}

#[tokio::test]
async fn local_packages_survive_an_unreachable_upstream() {
    let source = "http://127.0.0.1:1/v3/index.json".to_string();
    let (server, _setup) = create_test_server(Some(source), &[("Local.Only", "1.0.0")]).await;

    let body: Value = server.get("/api/status").await.json();
    assert_eq!(body["mirror"]["enabled"], true);

    let body: Value = server.get("/v3/package/local.only/index.json").await.json();
    assert_eq!(body["versions"], json!(["1.0.0"]));

    server
        .get("/v3/package/local.only/1.0.0/local.only.1.0.0.nupkg")
        .await
        .assert_status_ok();

    server
        .get("/v3/registration/local.only/index.json")
        .await
        .assert_status_ok();

    let body: Value = server
        .get("/v3/search")
        .add_query_param("q", "local")
        .await
        .json();
    assert_eq!(body["totalHits"], 1);
    assert_eq!(body["data"][0]["id"], "Local.Only");
}
