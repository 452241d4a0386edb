use keylight_api::{LightState, Power};
use keylight_app::Error;
use keylight_app::client::KeylightClient;

mod common;
use common::mock_app::{initial_state, spawn_lights, test_settings, unreachable_endpoint};

fn client() -> KeylightClient {
    KeylightClient::new(&test_settings().http).unwrap()
}

#[tokio::test]
async fn test_get_state() {
    let lights = spawn_lights(&["Desk"]).await;

    let state = client().get_state(&lights[0].endpoint()).await.unwrap();

    assert_eq!(state, initial_state());
}

#[tokio::test]
async fn test_put_state_clamps_before_sending() {
    let lights = spawn_lights(&["Desk"]).await;

    let sent = client()
        .put_state(&lights[0].endpoint(), LightState::new(Power::On, 0, 1000))
        .await
        .unwrap();

    assert_eq!(sent, LightState::new(Power::On, 3, 344));
    assert_eq!(lights[0].history().await, vec![sent]);
}

#[tokio::test]
async fn test_accessory_info_and_rename() {
    let lights = spawn_lights(&["Desk"]).await;
    let endpoint = lights[0].endpoint();
    let client = client();

    let info = client.get_accessory_info(&endpoint).await.unwrap();
    assert_eq!(info.display_name, "Desk");
    assert_eq!(info.mac_address, "3C:6A:9D:00:00:01");

    client.put_display_name(&endpoint, "Key Left").await.unwrap();
    assert_eq!(lights[0].info().await.display_name, "Key Left");
}

#[tokio::test]
async fn test_errors() {
    let lights = spawn_lights(&["Desk"]).await;
    lights[0].set_offline(true).await;

    let error = client().get_state(&lights[0].endpoint()).await.unwrap_err();
    assert!(matches!(error, Error::Status { status: 503, .. }));

    let error = client().get_state(&unreachable_endpoint()).await.unwrap_err();
    assert!(matches!(error, Error::Network { .. }));
}

#[tokio::test]
async fn test_get_retries_transient_failures() {
    let lights = spawn_lights(&["Desk"]).await;
    lights[0].set_offline(true).await;

    let mut settings = test_settings();
    settings.http.retries = 2;
    settings.http.retry_delay_ms = 100;
    let client = KeylightClient::new(&settings.http).unwrap();

    let endpoint = lights[0].endpoint();
    let request = tokio::spawn(async move { client.get_state(&endpoint).await });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    lights[0].set_offline(false).await;

    assert_eq!(request.await.unwrap().unwrap(), initial_state());
}
