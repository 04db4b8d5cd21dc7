use crate::exporter::AppState;
use axum::{extract::Extension, response::Html};

pub async fn landing(Extension(state): Extension<AppState>) -> Html<String> {
    Html(render(&state.telemetry_path))
}

fn render(telemetry_path: &str) -> String {
    format!(
        "<html>\n<head><title>Bitbucket Exporter</title></head>\n<body>\n\
         <h1>Bitbucket Exporter</h1>\n\
         <p>{} {}</p>\n\
         <p><a href=\"{telemetry_path}\">Metrics</a></p>\n\
         <p><a href=\"/health\">Health</a></p>\n\
         </body>\n</html>\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_to_telemetry_path() {
        let page = render("/prom");
        assert!(page.contains("<a href=\"/prom\">Metrics</a>"));
        assert!(page.contains(env!("CARGO_PKG_VERSION")));
    }
}
