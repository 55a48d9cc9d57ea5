use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use snooz::{
    AdvertisementDecodeError, Command, DeviceIdentity, DeviceModel, FakeDeviceConfig,
    FakeHardwareClient, Provenance, SessionConfig, SnoozDevice, Volume, decode_advertisement,
    parse_advertisement,
};

fn advertisement(volume: u8, is_on: bool) -> Vec<u8> {
    let mut payload = vec![0x05];
    payload.extend_from_slice(&[0x00; 8]);
    payload.push(volume);
    payload.push(u8::from(is_on));
    payload
}

fn pro_device() -> SnoozDevice {
    let client = FakeHardwareClient::new(FakeDeviceConfig::default());
    let identity = DeviceIdentity::builder()
        .address("00:00:00:00:AB:CD")
        .model(DeviceModel::Pro)
        .build();
    SnoozDevice::spawn(identity, Arc::new(client), SessionConfig::default())
}

#[test]
fn empty_payload_reports_insufficient_data() {
    assert_matches!(
        decode_advertisement(&[], DeviceModel::Original),
        Err(AdvertisementDecodeError::InsufficientData { len: 0, .. })
    );
}

#[test]
fn pairing_token_is_exposed_while_pairing() -> anyhow::Result<()> {
    let mut payload = advertisement(20, false);
    payload[1..9].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33]);

    let data = parse_advertisement(&payload, DeviceModel::Original)?;

    assert!(data.is_pairing());
    assert_eq!(Some("deadbeef00112233"), data.pairing_token.as_deref());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn advertisement_updates_snapshot_while_disconnected() -> anyhow::Result<()> {
    let device = pro_device();
    let mut updates = device.subscribe_state();

    let decoded = device.observe_advertisement(&advertisement(35, true))?;
    updates.changed().await?;

    assert_eq!(Some(decoded), device.current_state());
    assert_eq!(DeviceModel::Pro, decoded.model);
    assert_eq!(Provenance::Advertisement, decoded.provenance);
    assert_eq!(Volume::new(35)?, decoded.volume);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn undecodable_advertisement_keeps_previous_snapshot() -> anyhow::Result<()> {
    let device = pro_device();
    let mut updates = device.subscribe_state();
    let decoded = device.observe_advertisement(&advertisement(35, true))?;
    updates.changed().await?;

    let result = device.observe_advertisement(&advertisement(200, true));

    assert_matches!(result, Err(AdvertisementDecodeError::Malformed { .. }));
    assert_eq!(Some(decoded), device.current_state());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn advertisement_is_ignored_while_connected() -> anyhow::Result<()> {
    let device = pro_device();
    let result = device.execute(Command::set_volume(Volume::new(60)?)).await;
    assert!(result.is_success());
    let connected_snapshot = device.current_state();

    device.observe_advertisement(&advertisement(10, false))?;
    // Messages are handled in order, so the advertisement is applied (or
    // dropped) before the disconnect completes.
    device.disconnect().await;

    assert_eq!(connected_snapshot, device.current_state());
    assert_matches!(
        device.current_state(),
        Some(snapshot) if snapshot.provenance == Provenance::Notification
    );
    Ok(())
}
