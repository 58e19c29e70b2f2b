use axum::http::StatusCode;
use owo_colors::OwoColorize;

pub async fn request(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();
    let is_success =
        response.status().is_success() || response.status() == StatusCode::SWITCHING_PROTOCOLS;
    let (a, b) = if is_success {
        ((20, 163, 73), (25, 163, 118))
    } else {
        ((230, 126, 16), (171, 85, 17))
    };
    println!(
        "{} {} {} {} {}{}{}",
        method.truecolor(b.0, b.1, b.2),
        path.truecolor(b.0, b.1, b.2),
        "→".truecolor(a.0, a.1, a.2),
        response.status().truecolor(b.0, b.1, b.2),
        "(".truecolor(a.0, a.1, a.2),
        format!("{:?}", duration).truecolor(b.0, b.1, b.2),
        ")".truecolor(a.0, a.1, a.2),
    );
    response
}
