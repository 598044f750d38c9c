//! 命令意图校验。

use crate::error::ControlError;
use domain::{CommandPayload, Device, Intent};

/// 校验意图并返回规整后的载荷（钥匙去空白、去重，保持原有顺序）。
pub(crate) fn validate_intent(
    device: &Device,
    intent: &Intent,
) -> Result<CommandPayload, ControlError> {
    if intent.issued_by.trim().is_empty() {
        return Err(ControlError::Validation("issued_by is empty".to_string()));
    }
    let kind = intent.payload.kind();
    if kind.requires_active() && !device.active {
        return Err(ControlError::DeviceInactive(device.address.clone()));
    }
    match &intent.payload {
        CommandPayload::AddKeys { apartment, keys } => Ok(CommandPayload::AddKeys {
            apartment: check_apartment(*apartment, "apartment")?,
            keys: normalize_keys(keys)?,
        }),
        CommandPayload::RemoveKeys { apartment, keys } => Ok(CommandPayload::RemoveKeys {
            apartment: check_apartment(*apartment, "apartment")?,
            keys: normalize_keys(keys)?,
        }),
        CommandPayload::CallToFlat { flat_number } => Ok(CommandPayload::CallToFlat {
            flat_number: check_apartment(*flat_number, "flat_number")?,
        }),
        other => Ok(other.clone()),
    }
}

fn check_apartment(value: u32, field: &str) -> Result<u32, ControlError> {
    if value == 0 {
        return Err(ControlError::Validation(format!(
            "{field} must be a positive integer"
        )));
    }
    Ok(value)
}

fn normalize_keys(keys: &[String]) -> Result<Vec<String>, ControlError> {
    let mut normalized: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        let key = key.trim();
        if key.is_empty() {
            return Err(ControlError::Validation("key id is empty".to_string()));
        }
        if !normalized.iter().any(|existing| existing == key) {
            normalized.push(key.to_string());
        }
    }
    if normalized.is_empty() {
        return Err(ControlError::Validation("keys is empty".to_string()));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(payload: CommandPayload) -> Intent {
        Intent::new("AA", payload, "admin")
    }

    #[test]
    fn inactive_device_rejects_door_and_call_commands() {
        let mut device = Device::new("AA", "m", "loc");
        device.active = false;
        for payload in [
            CommandPayload::OpenDoor,
            CommandPayload::CloseDoor,
            CommandPayload::CallToFlat { flat_number: 3 },
        ] {
            let err = validate_intent(&device, &intent(payload)).unwrap_err();
            assert!(matches!(err, ControlError::DeviceInactive(_)));
        }
        assert!(validate_intent(&device, &intent(CommandPayload::MakeActive)).is_ok());
        assert!(
            validate_intent(
                &device,
                &intent(CommandPayload::RemoveKeys {
                    apartment: 1,
                    keys: vec!["K1".to_string()],
                })
            )
            .is_ok()
        );
    }

    #[test]
    fn key_payloads_are_checked_and_normalized() {
        let device = Device::new("AA", "m", "loc");
        let err = validate_intent(
            &device,
            &intent(CommandPayload::AddKeys {
                apartment: 0,
                keys: vec!["K1".to_string()],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        let err = validate_intent(
            &device,
            &intent(CommandPayload::AddKeys {
                apartment: 12,
                keys: Vec::new(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        let payload = validate_intent(
            &device,
            &intent(CommandPayload::AddKeys {
                apartment: 12,
                keys: vec![" K1 ".to_string(), "K2".to_string(), "K1".to_string()],
            }),
        )
        .expect("valid");
        assert_eq!(
            payload,
            CommandPayload::AddKeys {
                apartment: 12,
                keys: vec!["K1".to_string(), "K2".to_string()],
            }
        );
    }

    #[test]
    fn call_requires_positive_flat_number() {
        let device = Device::new("AA", "m", "loc");
        let err = validate_intent(&device, &intent(CommandPayload::CallToFlat { flat_number: 0 }))
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
    }
}
