//! Router selection, degradation and tenant isolation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use switchboard::channels::templates::StaticTemplateCatalog;
use switchboard::channels::ChannelSendAdapter;
use switchboard::config::DispatchConfig;
use switchboard::credentials::{EncryptedChannelConfig, StoreError, TenantConfigStore};
use switchboard::types::{
    ButtonOption, Capability, Channel, ErrorKind, ListRow, ListSection, MediaKind, SendRequest,
    SendResult, SendStatus, ShapeLimits, TenantId,
};
use switchboard::{ChannelRouter, DispatchError};
use tokio_util::sync::CancellationToken;

use crate::support::{self, RecordingAdapter};

fn router_over(adapter: &Arc<RecordingAdapter>) -> ChannelRouter {
    router_with_templates(adapter, StaticTemplateCatalog::new())
}

fn router_with_templates(
    adapter: &Arc<RecordingAdapter>,
    templates: StaticTemplateCatalog,
) -> ChannelRouter {
    let adapter: Arc<dyn ChannelSendAdapter> = Arc::clone(adapter) as Arc<dyn ChannelSendAdapter>;
    support::router_with(vec![adapter], templates)
}

fn messenger_like() -> Arc<RecordingAdapter> {
    Arc::new(RecordingAdapter::new(
        Channel::Messenger,
        [
            Capability::Text,
            Capability::Media,
            Capability::Buttons,
            Capability::ReadReceipt,
        ],
    ))
}

fn instagram_like() -> Arc<RecordingAdapter> {
    Arc::new(RecordingAdapter::new(
        Channel::Instagram,
        [Capability::Text, Capability::Media, Capability::ReadReceipt],
    ))
}

fn rooms(count: usize) -> SendRequest {
    let labels = ["Suite A", "Suite B", "Suite C", "Suite D", "Suite E"];
    SendRequest::List {
        header: "Quartos".to_owned(),
        action_label: None,
        sections: vec![ListSection {
            title: Some("Disponíveis".to_owned()),
            rows: labels
                .iter()
                .take(count)
                .enumerate()
                .map(|(i, label)| ListRow::new(format!("room-{i}"), *label))
                .collect(),
        }],
        footer: None,
    }
}

fn tenant() -> TenantId {
    TenantId::new("t1")
}

#[tokio::test]
async fn native_buttons_are_delivered_unchanged() {
    let adapter = messenger_like();
    let router = router_over(&adapter);
    let request = SendRequest::Buttons {
        body: "Confirma a reserva?".to_owned(),
        options: vec![
            ButtonOption::new("yes", "Sim"),
            ButtonOption::new("no", "Não"),
            ButtonOption::new("later", "Depois"),
        ],
        header: Some("Reserva".to_owned()),
        footer: None,
    };

    let result = router
        .send(&tenant(), Channel::Messenger, "psid-1", &request)
        .await
        .expect("send should succeed");

    assert_eq!(result, SendResult::sent(Some("mid.1".to_owned())));
    assert_eq!(adapter.calls(), vec![request]);
}

#[tokio::test]
async fn list_degrades_to_numbered_text_without_list_support() {
    let adapter = instagram_like();
    let router = router_over(&adapter);

    let result = router
        .send(&tenant(), Channel::Instagram, "igsid-1", &rooms(4))
        .await
        .expect("send should succeed");

    assert!(result.is_sent());
    assert_eq!(
        adapter.calls(),
        vec![SendRequest::text(
            "Quartos\n1. Suite A\n2. Suite B\n3. Suite C\n4. Suite D"
        )]
    );
}

#[tokio::test]
async fn short_list_degrades_to_buttons_when_supported() {
    let adapter = messenger_like();
    let router = router_over(&adapter);

    router
        .send(&tenant(), Channel::Messenger, "psid-1", &rooms(3))
        .await
        .expect("send should succeed");

    assert_eq!(
        adapter.calls(),
        vec![SendRequest::buttons(
            "Quartos",
            vec![
                ButtonOption::new("room-0", "Suite A"),
                ButtonOption::new("room-1", "Suite B"),
                ButtonOption::new("room-2", "Suite C"),
            ],
        )]
    );
}

#[tokio::test]
async fn long_list_skips_buttons_and_falls_back_to_text() {
    let adapter = messenger_like();
    let router = router_over(&adapter);

    router
        .send(&tenant(), Channel::Messenger, "psid-1", &rooms(5))
        .await
        .expect("send should succeed");

    let calls = adapter.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        SendRequest::Text { body } => assert!(body.ends_with("5. Suite E"), "got {body}"),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn too_many_buttons_become_numbered_text() {
    let adapter = messenger_like();
    let router = router_over(&adapter);
    let request = SendRequest::buttons(
        "Escolha",
        vec![
            ButtonOption::new("a", "Café"),
            ButtonOption::new("b", "Almoço"),
            ButtonOption::new("c", "Jantar"),
            ButtonOption::new("d", "Ceia"),
        ],
    );

    router
        .send(&tenant(), Channel::Messenger, "psid-1", &request)
        .await
        .expect("send should succeed");

    assert_eq!(
        adapter.calls(),
        vec![SendRequest::text(
            "Escolha\n1. Café\n2. Almoço\n3. Jantar\n4. Ceia"
        )]
    );
}

#[tokio::test]
async fn media_degrades_to_caption_and_link() {
    let adapter = Arc::new(RecordingAdapter::new(Channel::Instagram, [Capability::Text]));
    let router = router_over(&adapter);
    let request = SendRequest::Media {
        url: "https://cdn.example.com/menu.pdf".to_owned(),
        kind: MediaKind::Document,
        caption: Some("Cardápio".to_owned()),
        filename: Some("menu.pdf".to_owned()),
    };

    router
        .send(&tenant(), Channel::Instagram, "igsid-1", &request)
        .await
        .expect("send should succeed");

    assert_eq!(
        adapter.calls(),
        vec![SendRequest::text("Cardápio\nhttps://cdn.example.com/menu.pdf")]
    );
}

#[tokio::test]
async fn template_renders_from_catalog_without_native_support() {
    let adapter = messenger_like();
    let templates = StaticTemplateCatalog::new().with_template("welcome", "Bem-vindo, {{1}}!");
    let router = router_with_templates(&adapter, templates);

    router
        .send(
            &tenant(),
            Channel::Messenger,
            "psid-1",
            &SendRequest::template("welcome", vec!["Maria".to_owned()]),
        )
        .await
        .expect("send should succeed");

    assert_eq!(adapter.calls(), vec![SendRequest::text("Bem-vindo, Maria!")]);
}

#[tokio::test]
async fn unknown_template_fails_without_sending() {
    let adapter = instagram_like();
    let router = router_over(&adapter);

    let result = router
        .send(
            &tenant(),
            Channel::Instagram,
            "igsid-1",
            &SendRequest::template("missing", Vec::new()),
        )
        .await
        .expect("dispatch should return a result");

    assert_eq!(result, SendResult::failed(ErrorKind::TemplateTextMissing));
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn read_receipt_is_skipped_when_unsupported() {
    let adapter = Arc::new(RecordingAdapter::new(Channel::Instagram, [Capability::Text]));
    let router = router_over(&adapter);

    let result = router
        .mark_read(&tenant(), Channel::Instagram, "igsid-1", "mid.abc")
        .await
        .expect("dispatch should return a result");

    assert_eq!(result.status, SendStatus::Skipped);
    assert!(adapter.calls().is_empty());
}

#[tokio::test]
async fn identical_requests_produce_identical_payloads() {
    let adapter = instagram_like();
    let router = router_over(&adapter);

    for _ in 0..2 {
        router
            .send(&tenant(), Channel::Instagram, "igsid-1", &rooms(4))
            .await
            .expect("send should succeed");
    }

    let calls = adapter.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
}

#[test]
fn builder_rejects_adapter_without_text() {
    let adapter: Arc<dyn ChannelSendAdapter> = Arc::new(RecordingAdapter::new(
        Channel::WhatsApp,
        [Capability::Media],
    ));

    let err = ChannelRouter::builder()
        .adapter(adapter)
        .err()
        .expect("adapter without text must be rejected");

    assert!(matches!(
        err,
        DispatchError::ChannelMisconfigured {
            channel: Channel::WhatsApp,
            ..
        }
    ));
}

#[tokio::test]
async fn unregistered_channel_is_unsupported() {
    let adapter = instagram_like();
    let router = router_over(&adapter);

    let err = router
        .send(&tenant(), Channel::WhatsApp, "5511999999999", &SendRequest::text("oi"))
        .await
        .expect_err("no adapter for whatsapp");

    assert!(matches!(err, DispatchError::UnsupportedChannel { .. }));
}

#[tokio::test]
async fn unknown_channel_name_is_unsupported() {
    let adapter = instagram_like();
    let router = router_over(&adapter);

    let err = router
        .send_by_name(&tenant(), "telegram", "123", &SendRequest::text("oi"))
        .await
        .expect_err("telegram is not a channel");

    assert!(matches!(
        err,
        DispatchError::UnsupportedChannel { ref channel } if channel == "telegram"
    ));
}

#[tokio::test]
async fn channel_names_are_case_insensitive() {
    let adapter = instagram_like();
    let router = router_over(&adapter);

    let result = router
        .send_by_name(&tenant(), "Instagram", "igsid-1", &SendRequest::text("oi"))
        .await
        .expect("send should succeed");

    assert!(result.is_sent());
}

#[tokio::test]
async fn tenant_without_credentials_never_reaches_the_network() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST);
        then.status(200)
            .json_body(json!({ "messages": [{ "id": "wamid.1" }] }));
    });
    let store = support::store_with(&[("t1", Channel::WhatsApp, "1111", "EAAt1token")]).await;
    let router = support::live_router(&server.base_url(), store, StaticTemplateCatalog::new());

    let err = router
        .send(
            &TenantId::new("t2"),
            Channel::WhatsApp,
            "5511999999999",
            &SendRequest::text("oi"),
        )
        .await
        .expect_err("t2 has no whatsapp credentials");

    assert!(matches!(
        err,
        DispatchError::CredentialsMissing {
            channel: Channel::WhatsApp,
            ..
        }
    ));
    mock.assert_calls(0);
}

#[tokio::test]
async fn each_tenant_uses_its_own_account_and_token() {
    let server = MockServer::start();
    let t1 = server.mock(|when, then| {
        when.method(POST)
            .path("/v21.0/page-1/messages")
            .header("authorization", "Bearer EAApage1");
        then.status(200)
            .json_body(json!({ "recipient_id": "psid-1", "message_id": "m_1" }));
    });
    let t2 = server.mock(|when, then| {
        when.method(POST)
            .path("/v21.0/page-2/messages")
            .header("authorization", "Bearer EAApage2");
        then.status(200)
            .json_body(json!({ "recipient_id": "psid-2", "message_id": "m_2" }));
    });
    let store = support::store_with(&[
        ("t1", Channel::Messenger, "page-1", "EAApage1"),
        ("t2", Channel::Messenger, "page-2", "EAApage2"),
    ])
    .await;
    let router = support::live_router(&server.base_url(), store, StaticTemplateCatalog::new());

    let first = router
        .send(&TenantId::new("t1"), Channel::Messenger, "psid-1", &SendRequest::text("a"))
        .await
        .expect("t1 send should succeed");
    let second = router
        .send(&TenantId::new("t2"), Channel::Messenger, "psid-2", &SendRequest::text("b"))
        .await
        .expect("t2 send should succeed");

    assert_eq!(first.provider_message_id.as_deref(), Some("m_1"));
    assert_eq!(second.provider_message_id.as_deref(), Some("m_2"));
    t1.assert_calls(1);
    t2.assert_calls(1);
}

#[tokio::test]
async fn cancelled_dispatch_reports_cancelled() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST);
        then.status(200)
            .json_body(json!({ "message_id": "m_1" }));
    });
    let store = support::store_with(&[("t1", Channel::Messenger, "page-1", "EAApage1")]).await;
    let router = support::live_router(&server.base_url(), store, StaticTemplateCatalog::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = router
        .send_with_cancellation(
            &tenant(),
            Channel::Messenger,
            "psid-1",
            &SendRequest::text("oi"),
            &cancel,
        )
        .await
        .expect("cancellation is a result, not an error");

    assert_eq!(result, SendResult::failed(ErrorKind::Cancelled));
    mock.assert_calls(0);
}

#[tokio::test]
async fn cancelled_dispatch_skips_the_credential_lookup() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST);
        then.status(200).json_body(json!({ "message_id": "m_1" }));
    });
    let store = support::store_with(&[]).await;
    let router = support::live_router(&server.base_url(), store, StaticTemplateCatalog::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = router
        .send_with_cancellation(
            &TenantId::new("unconfigured"),
            Channel::Messenger,
            "psid-1",
            &SendRequest::text("oi"),
            &cancel,
        )
        .await
        .expect("cancellation wins over missing credentials");

    assert_eq!(result, SendResult::failed(ErrorKind::Cancelled));
    mock.assert_calls(0);
}

/// Store whose lookups never complete.
struct StalledStore;

#[async_trait]
impl TenantConfigStore for StalledStore {
    async fn channel_config(
        &self,
        _tenant_id: &TenantId,
        _channel: Channel,
    ) -> Result<Option<EncryptedChannelConfig>, StoreError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_stalled_credential_lookup() {
    let router = support::live_router_over(
        "http://127.0.0.1:9",
        Arc::new(StalledStore),
        StaticTemplateCatalog::new(),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    for channel in [Channel::WhatsApp, Channel::Messenger, Channel::Instagram] {
        let result = router
            .send_with_cancellation(
                &tenant(),
                channel,
                "5511987654321",
                &SendRequest::text("oi"),
                &cancel,
            )
            .await
            .expect("cancellation is a result, not an error");
        assert_eq!(result, SendResult::failed(ErrorKind::Cancelled), "{channel}");
    }
}

#[tokio::test]
async fn media_kind_outside_native_set_is_degraded_by_the_router() {
    let adapter = Arc::new(
        RecordingAdapter::new(Channel::Instagram, [Capability::Text, Capability::Media])
            .with_limits(ShapeLimits {
                native_media: &[MediaKind::Image],
                ..ShapeLimits::default()
            }),
    );
    let router = router_over(&adapter);
    let video = SendRequest::Media {
        url: "https://cdn.example.com/tour.mp4".to_owned(),
        kind: MediaKind::Video,
        caption: Some("Tour".to_owned()),
        filename: None,
    };
    let image = SendRequest::Media {
        url: "https://cdn.example.com/quarto.jpg".to_owned(),
        kind: MediaKind::Image,
        caption: None,
        filename: None,
    };

    for request in [&video, &image] {
        router
            .send(&tenant(), Channel::Instagram, "igsid-1", request)
            .await
            .expect("send should succeed");
    }

    assert_eq!(
        adapter.calls(),
        vec![
            SendRequest::text("Tour\nhttps://cdn.example.com/tour.mp4"),
            image.clone(),
        ]
    );
}

fn config_for(server: &MockServer) -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.graph.base_url = server.base_url();
    config
}

fn router_from(config: &DispatchConfig, store: Arc<dyn TenantConfigStore>) -> ChannelRouter {
    match ChannelRouter::from_config(config, store, Arc::new(support::cipher())) {
        Ok(router) => router,
        Err(err) => panic!("router should build from config: {err}"),
    }
}

#[tokio::test]
async fn configured_router_renders_templates_and_uses_default_language() {
    let server = MockServer::start();
    let messenger = server.mock(|when, then| {
        when.method(POST)
            .path("/v21.0/page-1/messages")
            .header("authorization", "Bearer EAApage1")
            .json_body_includes(json!({ "message": { "text": "Bem-vindo, Maria!" } }).to_string());
        then.status(200).json_body(json!({ "message_id": "m_welcome" }));
    });
    let whatsapp = server.mock(|when, then| {
        when.method(POST)
            .path("/v21.0/109876543210/messages")
            .json_body_includes(
                json!({
                    "template": { "name": "welcome", "language": { "code": "en_US" } },
                })
                .to_string(),
            );
        then.status(200).json_body(json!({ "messages": [{ "id": "wamid.tpl" }] }));
    });
    let mut config = config_for(&server);
    config
        .templates
        .insert("welcome".to_owned(), "Bem-vindo, {{1}}!".to_owned());
    config.whatsapp.default_language = "en_US".to_owned();
    let store = support::store_with(&[
        ("t1", Channel::Messenger, "page-1", "EAApage1"),
        ("t1", Channel::WhatsApp, "109876543210", "EAAwhatsappTenantToken0123456789"),
    ])
    .await;
    let router = router_from(&config, Arc::new(store));
    let request = SendRequest::template("welcome", vec!["Maria".to_owned()]);

    let on_messenger = router
        .send(&tenant(), Channel::Messenger, "psid-1", &request)
        .await
        .expect("messenger send should succeed");
    let on_whatsapp = router
        .send(&tenant(), Channel::WhatsApp, "5511987654321", &request)
        .await
        .expect("whatsapp send should succeed");

    assert_eq!(on_messenger.provider_message_id.as_deref(), Some("m_welcome"));
    assert_eq!(on_whatsapp.provider_message_id.as_deref(), Some("wamid.tpl"));
    messenger.assert();
    whatsapp.assert();
    assert_eq!(
        router.channels(),
        vec![Channel::WhatsApp, Channel::Messenger, Channel::Instagram]
    );
}

#[tokio::test]
async fn caller_owned_cache_is_invalidated_on_reconfiguration() {
    let server = MockServer::start();
    let old_page = server.mock(|when, then| {
        when.method(POST)
            .path("/v21.0/page-old/messages")
            .header("authorization", "Bearer EAApageOld");
        then.status(200).json_body(json!({ "message_id": "m_old" }));
    });
    let new_page = server.mock(|when, then| {
        when.method(POST)
            .path("/v21.0/page-new/messages")
            .header("authorization", "Bearer EAApageNew");
        then.status(200).json_body(json!({ "message_id": "m_new" }));
    });
    let mut config = config_for(&server);
    config.credentials.cache_ttl_secs = Some(300);
    let store = Arc::new(
        support::store_with(&[("t1", Channel::Messenger, "page-old", "EAApageOld")]).await,
    );
    let cache = match config.credentials.caching_store(Arc::clone(&store)) {
        Some(cache) => Arc::new(cache),
        None => panic!("caching is enabled by cache_ttl_secs"),
    };
    let router = router_from(&config, Arc::clone(&cache) as Arc<dyn TenantConfigStore>);
    let tenant = tenant();
    let text = SendRequest::text("oi");
    let send = || router.send(&tenant, Channel::Messenger, "psid-1", &text);

    let first = send().await.expect("first send should succeed");
    support::configure(&store, "t1", Channel::Messenger, "page-new", "EAApageNew").await;
    let cached = send().await.expect("cached send should succeed");
    cache.invalidate(&tenant, Channel::Messenger).await;
    let refreshed = send().await.expect("refreshed send should succeed");

    assert_eq!(first.provider_message_id.as_deref(), Some("m_old"));
    assert_eq!(cached.provider_message_id.as_deref(), Some("m_old"));
    assert_eq!(refreshed.provider_message_id.as_deref(), Some("m_new"));
    old_page.assert_calls(2);
    new_page.assert_calls(1);
}

#[tokio::test]
async fn configured_router_reads_the_store_without_caching_by_default() {
    let server = MockServer::start();
    let new_page = server.mock(|when, then| {
        when.method(POST).path("/v21.0/page-new/messages");
        then.status(200).json_body(json!({ "message_id": "m_new" }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/v21.0/page-old/messages");
        then.status(200).json_body(json!({ "message_id": "m_old" }));
    });
    let config = config_for(&server);
    assert!(config.credentials.caching_store(support::store_with(&[]).await).is_none());
    let store = Arc::new(
        support::store_with(&[("t1", Channel::Messenger, "page-old", "EAApageOld")]).await,
    );
    let router = router_from(&config, Arc::clone(&store) as Arc<dyn TenantConfigStore>);

    router
        .send(&tenant(), Channel::Messenger, "psid-1", &SendRequest::text("oi"))
        .await
        .expect("first send should succeed");
    support::configure(&store, "t1", Channel::Messenger, "page-new", "EAApageNew").await;
    let second = router
        .send(&tenant(), Channel::Messenger, "psid-1", &SendRequest::text("oi"))
        .await
        .expect("second send should succeed");

    assert_eq!(second.provider_message_id.as_deref(), Some("m_new"));
    new_page.assert_calls(1);
}
