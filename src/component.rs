//! Spin component entrypoint. Each request opens the default key-value
//! store and runs through the shared router.

use spin_sdk::http::{IntoResponse, Request};
use spin_sdk::http_component;

use crate::config::Config;
use crate::core::db::init_test_data;
use crate::core::store::SpinStore;
use crate::media::KvMediaHost;
use crate::router::{handle_request, AppContext};

#[http_component]
fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
    let config = Config::from_env();
    let store = SpinStore::open_default()?;
    if config.seed_demo_data {
        init_test_data(&store)?;
    }

    let media = KvMediaHost::new(&store, &config.media_base_url);
    let ctx = AppContext {
        store: &store,
        media: &media,
        config: &config,
    };
    Ok(handle_request(&ctx, &req))
}
