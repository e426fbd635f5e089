/// Transaction Normalization
///
/// Maps the node's verbose transaction JSON onto the shape the reconcilers
/// consume:
/// - coinbase input  -> `InputRef::Coinbase`
/// - `txid` + numeric `vout` -> `InputRef::Spend`
/// - any other input is dropped
/// - outputs keep value (minimal units), index, script type and the first
///   address of the script
///
/// Multisig scripts name several addresses; only the first one is credited.

use tracing::{debug, trace};
use crate::error::Result;
use crate::satoshi::{convert_to_satoshi, f64_to_satoshi};
use crate::telemetry::truncate_hex;
use crate::types::{
    Amount, InputRef, NormalizedTransaction, OutputEntry, OutputKind, RawTransaction, RawTxIn,
    RawTxOut,
};

/// Normalize one raw transaction.
///
/// Fails only when an output amount is not a number; such a transaction
/// must be rejected before reconciliation.
pub fn normalize_tx(tx: &RawTransaction) -> Result<NormalizedTransaction> {
    let vin = tx.vin.iter().filter_map(normalize_input).collect();

    let vout = tx
        .vout
        .iter()
        .map(|out| normalize_output(&tx.txid, out))
        .collect::<Result<Vec<_>>>()?;

    Ok(NormalizedTransaction {
        txid: tx.txid.clone(),
        time: tx.time,
        vin,
        vout,
    })
}

/// Parse node JSON text and normalize it.
pub fn normalize_json(json: &str) -> Result<NormalizedTransaction> {
    let raw: RawTransaction = serde_json::from_str(json)?;
    normalize_tx(&raw)
}

fn normalize_input(tin: &RawTxIn) -> Option<InputRef> {
    if tin.coinbase.as_deref().is_some_and(|c| !c.is_empty()) {
        return Some(InputRef::Coinbase);
    }

    let id = tin.txid.as_deref().filter(|id| !id.is_empty())?;
    let n = tin
        .vout
        .as_ref()
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok());

    match n {
        Some(n) => Some(InputRef::Spend { id: id.to_string(), n }),
        None => {
            trace!(prev_txid = %truncate_hex(id, 16), "Dropping input without numeric vout");
            None
        }
    }
}

fn normalize_output(txid: &str, out: &RawTxOut) -> Result<OutputEntry> {
    let val = match &out.value {
        Amount::Number(v) => f64_to_satoshi(*v)?,
        Amount::Text(s) => convert_to_satoshi(s)?,
    };

    let script = &out.script_pubkey;
    let addr = match &script.addresses {
        Some(addresses) => {
            if addresses.len() > 1 {
                debug!(
                    txid = %truncate_hex(txid, 16),
                    n = out.n,
                    dropped = addresses.len() - 1,
                    "Multi-address script, crediting first address only"
                );
            }
            addresses.first().cloned()
        }
        None => script.address.clone(),
    };

    Ok(OutputEntry {
        val,
        n: out.n,
        addr,
        kind: OutputKind::from_script_type(&script.script_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawTransaction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_coinbase_and_spend_inputs() {
        let tx = raw(json!({
            "txid": "t1",
            "time": 42,
            "vin": [
                {"coinbase": "0401"},
                {"txid": "prev", "vout": 2},
            ],
            "vout": []
        }));
        let norm = normalize_tx(&tx).unwrap();
        assert_eq!(norm.txid, "t1");
        assert_eq!(norm.time, 42);
        assert_eq!(
            norm.vin,
            vec![InputRef::Coinbase, InputRef::Spend { id: "prev".into(), n: 2 }]
        );
    }

    #[test]
    fn test_unrecognized_inputs_dropped() {
        let tx = raw(json!({
            "txid": "t1",
            "vin": [
                {"txid": "prev", "vout": "1"},
                {"txid": "", "vout": 0},
                {"vout": 0},
                {"coinbase": ""},
                {}
            ],
            "vout": []
        }));
        assert!(normalize_tx(&tx).unwrap().vin.is_empty());
    }

    #[test]
    fn test_output_mapping() {
        let tx = raw(json!({
            "txid": "t1",
            "vin": [],
            "vout": [
                {"value": 1.5, "n": 0, "scriptPubKey": {"type": "pubkeyhash", "addresses": ["A"]}},
                {"value": "0.1", "n": 1, "scriptPubKey": {"type": "multisig", "addresses": ["B", "C"]}},
                {"value": 0, "n": 2, "scriptPubKey": {"type": "nulldata"}},
                {"value": 2, "n": 3, "scriptPubKey": {"type": "witness_v0_keyhash", "address": "D"}}
            ]
        }));
        let norm = normalize_tx(&tx).unwrap();

        assert_eq!(norm.vout[0], OutputEntry {
            val: 150_000_000,
            n: 0,
            addr: Some("A".into()),
            kind: OutputKind::Standard("pubkeyhash".into()),
        });
        assert_eq!(norm.vout[1].addr.as_deref(), Some("B"));
        assert_eq!(norm.vout[1].val, 10_000_000);
        assert_eq!(norm.vout[2].addr, None);
        assert_eq!(norm.vout[2].kind, OutputKind::NullData);
        assert_eq!(norm.vout[3].addr.as_deref(), Some("D"));
    }

    #[test]
    fn test_empty_address_list() {
        let tx = raw(json!({
            "txid": "t1",
            "vout": [{"value": 1, "n": 0, "scriptPubKey": {"type": "pubkeyhash", "addresses": []}}]
        }));
        let norm = normalize_tx(&tx).unwrap();
        assert_eq!(norm.vout[0].addr, None);
    }

    #[test]
    fn test_invalid_amount_rejects_transaction() {
        let tx = raw(json!({
            "txid": "t1",
            "vout": [{"value": "lots", "n": 0, "scriptPubKey": {"type": "pubkeyhash", "addresses": ["A"]}}]
        }));
        assert!(matches!(normalize_tx(&tx), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_normalize_json() {
        let norm = normalize_json(r#"{"txid":"t9","vin":[{"coinbase":"01"}],"vout":[]}"#).unwrap();
        assert_eq!(norm.vin, vec![InputRef::Coinbase]);
        assert!(normalize_json("{not json").is_err());
    }
}
