//! NUT-06: Mint Information
//!
//! <https://github.com/cashubtc/nuts/blob/main/06.md>
//!
//! Only the parts of the info document the claim engine reads are modeled,
//! unknown fields are ignored.

use serde::{Deserialize, Serialize};

use super::nut00::{CurrencyUnit, PaymentMethod};
use super::nut01::PublicKey;
use super::nut17;

/// Plain `{"supported": bool}` setting
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportedSetting {
    /// Setting supported
    #[serde(default)]
    pub supported: bool,
}

/// Supported nuts and settings
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nuts {
    /// NUT09 Settings
    #[serde(default, rename = "9")]
    pub nut09: SupportedSetting,
    /// NUT17 Settings
    #[serde(default, rename = "17")]
    pub nut17: nut17::SupportedSettings,
    /// NUT20 Settings
    #[serde(default, rename = "20")]
    pub nut20: SupportedSetting,
}

/// Mint Info [NUT-06]
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintInfo {
    /// name of the mint and should be recognizable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// hex pubkey of the mint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
    /// implementation name and the version running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<serde_json::Value>,
    /// Shows which NUTs the mint supports
    #[serde(default)]
    pub nuts: Nuts,
}

impl MintInfo {
    /// Does the mint push `bolt11_mint_quote` updates over NUT-17 for this method and unit
    pub fn supports_mint_quote_updates(&self, method: &PaymentMethod, unit: &CurrencyUnit) -> bool {
        self.nuts.nut17.supported.iter().any(|supported| {
            &supported.method == method
                && &supported.unit == unit
                && supported
                    .commands
                    .iter()
                    .any(|command| command == nut17::Kind::Bolt11MintQuote.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT_INFO: &str = r#"{
        "name": "Bob's Cashu mint",
        "pubkey": "0283bf290884eed3a7ca2663fc0260de2e2064d6b355ea13f98dec004b7a7ead99",
        "version": "Nutshell/0.15.0",
        "contact": [["email", "contact@me.com"]],
        "nuts": {
            "4": {"methods": [{"method": "bolt11", "unit": "sat"}], "disabled": false},
            "9": {"supported": true},
            "17": {"supported": [
                {"method": "bolt11", "unit": "sat", "commands": ["bolt11_melt_quote", "proof_state", "bolt11_mint_quote"]},
                {"method": "bolt11", "unit": "usd", "commands": ["proof_state"]}
            ]},
            "20": {"supported": true}
        }
    }"#;

    #[test]
    fn test_mint_quote_updates_capability() {
        let info: MintInfo = serde_json::from_str(MINT_INFO).unwrap();

        assert!(info.nuts.nut09.supported);
        assert!(info.nuts.nut20.supported);
        assert!(info.supports_mint_quote_updates(&PaymentMethod::Bolt11, &CurrencyUnit::Sat));
        assert!(!info.supports_mint_quote_updates(&PaymentMethod::Bolt11, &CurrencyUnit::Usd));
        assert!(!info.supports_mint_quote_updates(&PaymentMethod::Bolt11, &CurrencyUnit::Eur));
    }

    #[test]
    fn test_empty_info() {
        let info: MintInfo = serde_json::from_str("{}").unwrap();
        assert!(!info.supports_mint_quote_updates(&PaymentMethod::Bolt11, &CurrencyUnit::Sat));
    }
}
