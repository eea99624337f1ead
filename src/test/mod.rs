
use once_cell::sync::Lazy;
use tracing_subscriber::fmt;

use crate::cache::{FEATURES_KEY, Generic, ProvisioningCache};
use crate::{Builder, Client};

pub(crate) static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = fmt().with_test_writer().try_init();
});

pub(crate) fn init_tracing() {
    Lazy::force(&TRACING);
}

pub(crate) const NEW_UI_FOR_SHOP: &str = r#"[
    {
        "name": "acme.prod.new_ui",
        "enabled": true,
        "strategies": [
            {"name": "EnableForDomains", "parameters": {"domain_names": "shop,blog"}}
        ]
    }
]"#;

pub(crate) const NEW_UI_KILLED: &str = r#"[
    {
        "name": "acme.prod.new_ui",
        "enabled": false,
        "strategies": [
            {"name": "EnableForDomains", "parameters": {"domain_names": "shop,blog"}}
        ]
    }
]"#;

pub(crate) async fn seeded(snapshot: &str) -> Generic {
    let cache = Generic::default();
    cache
        .set(FEATURES_KEY, snapshot.as_bytes().to_vec())
        .await
        .unwrap();
    cache
}

pub(crate) async fn client_with(snapshot: &str) -> Client<Generic> {
    Builder::new("acme", "prod").build_with(seeded(snapshot).await)
}
