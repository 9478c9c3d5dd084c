//! Parsing of certificate C headers into named credential values.

use indexmap::IndexMap;

use crate::error::{Result, StoreError};

/// Which kind of certificate header is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    /// Developer certificate (`mbed_cloud_dev_credentials.c`).
    Developer,
    /// Update certificate (`update_default_resources.c`).
    Update,
}

impl CertKind {
    /// Last preprocessor statement before the variable definitions.
    fn include_marker(self) -> &'static str {
        match self {
            CertKind::Developer => "#include <inttypes.h>",
            CertKind::Update => "#include <stdint.h>",
        }
    }

    /// Prefix shared by every variable in the header.
    fn variable_prefix(self) -> &'static str {
        match self {
            CertKind::Developer => "MBED_CLOUD_DEV_",
            CertKind::Update => "arm_uc_",
        }
    }
}

/// Parse a certificate header into `variable name -> value`, in file order.
///
/// Array initialisers become one element per line:
///
/// ```text
/// const uint8_t arm_uc_vendor_id[] = { 0x12, 0x34 };   =>   arm_uc_vendor_id: "0x12\n0x34"
/// ```
pub fn parse_cert_header(header: &str, kind: CertKind) -> Result<IndexMap<String, String>> {
    let marker = kind.include_marker();
    let prefix = kind.variable_prefix();

    let (_, body) = header
        .trim()
        .split_once(marker)
        .ok_or_else(|| parse_error(format!("missing '{}'", marker)))?;

    let mut credentials = IndexMap::new();
    for statement in body.split(';') {
        let statement: String = statement
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .collect::<Vec<_>>()
            .join(" ");
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }

        let (declaration, value) = statement
            .split_once('=')
            .ok_or_else(|| parse_error(format!("expected an assignment in '{}'", statement)))?;

        let name = declaration
            .find(prefix)
            .map(|start| declaration[start..].trim().replace("[]", ""))
            .ok_or_else(|| parse_error(format!("no '{}' variable in '{}'", prefix, declaration)))?;

        credentials.insert(name, clean_value(value));
    }

    if credentials.is_empty() {
        return Err(parse_error("no credentials found".to_string()));
    }
    Ok(credentials)
}

fn clean_value(value: &str) -> String {
    value
        .replace(" '", "")
        .replace('"', "")
        .trim_matches(|c: char| c == '{' || c == '}' || c.is_whitespace())
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_error(message: String) -> crate::Error {
    StoreError::CertificateParse(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVELOPER_HEADER: &str = r#"
/*
 * Copyright notice
 */
#ifndef __MBED_CLOUD_DEV_CREDENTIALS_H__
#define __MBED_CLOUD_DEV_CREDENTIALS_H__

#include <inttypes.h>

const char MBED_CLOUD_DEV_BOOTSTRAP_ENDPOINT_NAME[] = "0161d7a6e1f10000000000010010006a";
const char MBED_CLOUD_DEV_ACCOUNT_ID[] = "0161d6ff2d6b0000";

const uint8_t MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE[] =
{ 0x30, 0x82, 0x02,
  0x1f, 0x30 };
const uint32_t MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE_SIZE = sizeof(MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE);

#endif //__MBED_CLOUD_DEV_CREDENTIALS_H__
"#;

    #[test]
    fn test_developer_header() {
        let creds = parse_cert_header(DEVELOPER_HEADER, CertKind::Developer).unwrap();
        let names: Vec<_> = creds.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "MBED_CLOUD_DEV_BOOTSTRAP_ENDPOINT_NAME",
                "MBED_CLOUD_DEV_ACCOUNT_ID",
                "MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE",
                "MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE_SIZE",
            ]
        );
        assert_eq!(
            creds["MBED_CLOUD_DEV_BOOTSTRAP_ENDPOINT_NAME"],
            "0161d7a6e1f10000000000010010006a"
        );
        assert_eq!(
            creds["MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE"],
            "0x30\n0x82\n0x02\n0x1f\n0x30"
        );
        assert_eq!(
            creds["MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE_SIZE"],
            "sizeof(MBED_CLOUD_DEV_BOOTSTRAP_DEVICE_CERTIFICATE)"
        );
    }

    #[test]
    fn test_update_header() {
        let header = "#include <stdint.h>\n\
                      const uint8_t arm_uc_vendor_id[] = { 0x12, 0x34 };\n\
                      const uint16_t arm_uc_vendor_id_size = sizeof(arm_uc_vendor_id);\n";
        let creds = parse_cert_header(header, CertKind::Update).unwrap();
        assert_eq!(creds["arm_uc_vendor_id"], "0x12\n0x34");
        assert_eq!(creds.len(), 2);
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        assert!(parse_cert_header(DEVELOPER_HEADER, CertKind::Update).is_err());
    }

    #[test]
    fn test_malformed_statement() {
        let header = "#include <stdint.h>\nconst uint8_t arm_uc_vendor_id[];\n";
        let err = parse_cert_header(header, CertKind::Update).unwrap_err();
        assert!(err.to_string().contains("expected an assignment"));
    }
}
