//! Load testing for the proxy.

use std::time::{Duration, Instant};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_performance() {
    // 1. Backends
    let b1 = common::start_mock_backend("Hello from b1").await;
    let b2 = common::start_mock_backend("Hello from b2").await;

    // 2. Proxy
    let dynamic = format!(
        r#"
[[services]]
name = "web"
load_balancer = "weighted"
backends = [{{ address = "{b1}", weight = 3 }}, {{ address = "{b2}", weight = 1 }}]

[[routers]]
name = "web"
path_prefix = "/"
service = "web"
"#
    );
    let proxy = common::start_proxy("web", &dynamic).await;

    // 3. Load
    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::new();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = format!("http://{}/", proxy.addr);
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() && res.bytes().await.is_ok() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert!(!all_latencies.is_empty(), "No successful requests recorded");
    all_latencies.sort();
    let at = |q: f64| all_latencies[((all_latencies.len() as f64 * q) as usize).min(all_latencies.len() - 1)];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", at(0.50));
    println!("P95 Latency:    {:?}", at(0.95));
    println!("P99 Latency:    {:?}", at(0.99));
    println!("Success Rate:   {}/{}", all_latencies.len(), total_requests);
    println!("-------------------------\n");

    // weighted 3:1 split
    let attempts = |addr: std::net::SocketAddr| {
        proxy
            .service
            .collector()
            .backend("web", &addr.to_string())
            .attempts
    };
    let (n1, n2) = (attempts(b1), attempts(b2));
    assert!(n1 + n2 >= all_latencies.len() as u64);
    assert!(n1 > n2 * 2, "weighted split {n1}:{n2}");

    let sample = proxy.service.collector().route_sample("web").unwrap();
    assert!(sample.requests >= all_latencies.len() as u64);

    proxy.shutdown.trigger();
}
