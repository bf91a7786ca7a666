#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate mediagram;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use tracing::{error, info};

    use mediagram::config::Config;
    use mediagram::core::db::init_test_data;
    use mediagram::core::store::MemoryStore;
    use mediagram::media::KvMediaHost;
    use mediagram::router::{handle_request, AppContext};

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request};

        pub fn actix_to_spin_request(
            req: &HttpRequest,
            body: actix_web::web::Bytes,
        ) -> anyhow::Result<Request> {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => anyhow::bail!("unsupported method {}", other),
            };

            let mut builder = Request::builder();
            builder.method(method).uri(req.uri().to_string());
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    builder.header(name.as_str(), val_str);
                }
            }

            Ok(builder.body(body.to_vec()).build())
        }

        pub fn spin_to_actix_response(spin_resp: spin_sdk::http::Response) -> actix_web::HttpResponse {
            let status = actix_web::http::StatusCode::from_u16(*spin_resp.status())
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

            let mut response = actix_web::HttpResponse::build(status);
            for (name, value) in spin_resp.headers() {
                if let Some(value) = value.as_str() {
                    response.insert_header((name.to_string(), value.to_string()));
                }
            }

            response.body(spin_resp.body().to_vec())
        }
    }

    struct AppState {
        store: MemoryStore,
        config: Config,
    }

    fn init_tracing() {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }

    pub async fn run() -> std::io::Result<()> {
        init_tracing();

        let config = Config::from_env();
        let store = MemoryStore::new();
        if config.seed_demo_data {
            if let Err(e) = init_test_data(&store) {
                error!("failed to seed demo data: {e:?}");
            }
        }

        let bind_addr = config.bind_addr.clone();
        let state = web::Data::new(AppState { store, config });
        info!("server listening on http://{}", bind_addr);

        HttpServer::new(move || {
            App::new()
                .app_data(web::PayloadConfig::new(mediagram::config::MAX_MEDIA_BYTES + 1))
                .app_data(state.clone())
                .default_service(web::route().to(handle_all))
        })
        .bind(bind_addr)?
        .run()
        .await
    }

    async fn handle_all(
        state: web::Data<AppState>,
        req: HttpRequest,
        body: web::Bytes,
    ) -> HttpResponse {
        let spin_req = match adapter::actix_to_spin_request(&req, body) {
            Ok(r) => r,
            Err(e) => {
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "ValidationError",
                    "message": e.to_string(),
                }))
            }
        };

        let media = KvMediaHost::new(&state.store, &state.config.media_base_url);
        let ctx = AppContext {
            store: &state.store,
            media: &media,
            config: &state.config,
        };
        adapter::spin_to_actix_response(handle_request(&ctx, &spin_req))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
