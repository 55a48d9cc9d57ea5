use clap::Parser;
use clap::error::ErrorKind;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;

async fn run_with_argv<const N: usize>(
    argv: [&str; N],
    output_format: snooz::OutputFormat,
) -> anyhow::Result<String> {
    let args = snooz::Args::try_parse_from(argv)?;
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let hardware_client = match maybe_fake_args {
        Some(fake_args) => snooz::fake_hardware_client(fake_args),
        None => snooz::real_hardware_client(),
    };
    let mut output = Vec::new();
    snooz::run(command, &mut output, hardware_client, output_format).await?;
    Ok(String::from_utf8(output)?)
}

#[tokio::test]
async fn decode_command_prints_snapshot_json() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        ["snooz", "decode", "0A0000000000000000320100"],
        snooz::OutputFormat::Json,
    )
    .await?;

    assert_snapshot!(stdout.trim_end(), @r#"
    {
      "snapshot": {
        "is_on": true,
        "volume": 50,
        "model": "original",
        "firmware_version": "v10",
        "provenance": "advertisement"
      },
      "pairing_token": null
    }
    "#);
    Ok(())
}

#[tokio::test]
async fn decode_command_rejects_unknown_firmware() {
    let result = run_with_argv(
        ["snooz", "decode", "FF0000000000000000320100"],
        snooz::OutputFormat::Json,
    )
    .await;

    let error = result.expect_err("firmware byte 0xFF should not decode");
    assert!(error.to_string().contains("0xFF"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn control_volume_command_applies_value() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "snooz",
            "--fake",
            "--fake-state",
            "1401",
            "control",
            "--address",
            "00:00:00:00:AB:CD",
            "volume",
            "45",
        ],
        snooz::OutputFormat::Json,
    )
    .await?;

    let record: serde_json::Value = serde_json::from_str(&stdout)?;
    assert_eq!("Snooz ABCD", record["device"]);
    assert_eq!("SetVolume(45%)", record["command"]);
    assert_eq!("success", record["status"]);
    assert_eq!(true, record["state"]["is_on"]);
    assert_eq!(45, record["state"]["volume"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn control_fails_when_writes_keep_being_rejected() {
    let result = run_with_argv(
        [
            "snooz",
            "--fake",
            "--fake-write-rejections",
            "5",
            "control",
            "--address",
            "00:00:00:00:AB:CD",
            "off",
        ],
        snooz::OutputFormat::Json,
    )
    .await;

    let error = result.expect_err("five rejections should exhaust the default attempts");
    assert!(error.to_string().contains("failed"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn control_recovers_from_transient_rejections() -> anyhow::Result<()> {
    let stdout = run_with_argv(
        [
            "snooz",
            "--fake",
            "--fake-write-rejections",
            "2",
            "control",
            "--address",
            "00:00:00:00:AB:CD",
            "on",
            "--volume",
            "25",
        ],
        snooz::OutputFormat::Pretty,
    )
    .await?;

    assert!(stdout.contains("TurnOn, SetVolume(25%)"), "{stdout}");
    assert!(stdout.contains("success"), "{stdout}");
    Ok(())
}

#[test]
fn control_volume_rejects_out_of_range_input() {
    let result = snooz::Args::try_parse_from([
        "snooz",
        "--fake",
        "control",
        "--address",
        "00:00:00:00:AB:CD",
        "volume",
        "101",
    ]);

    let error = result.expect_err("volume 101 should fail command parsing");
    assert_eq!(ErrorKind::ValueValidation, error.kind());
}

#[test]
fn control_requires_an_address() {
    let result = snooz::Args::try_parse_from(["snooz", "--fake", "control", "off"]);

    let error = result.expect_err("control without --address should fail");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}
