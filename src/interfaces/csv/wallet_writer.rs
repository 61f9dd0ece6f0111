use crate::domain::wallet::{Wallet, WalletStatus};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    owner: &'a str,
    balance: i64,
    status: WalletStatus,
}

/// Writes wallets as CSV with header `owner,balance,status`.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets<'a>(&mut self, wallets: impl IntoIterator<Item = &'a Wallet>) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(WalletRow {
                owner: wallet.owned_by.as_str(),
                balance: wallet.balance,
                status: wallet.status,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::OwnerId;
    use chrono::Utc;

    #[test]
    fn test_writes_header_and_rows() {
        let mut alice = Wallet::new(OwnerId::new("alice").unwrap());
        alice.enable(Utc::now()).unwrap();
        alice.balance = 49_900;
        let bob = Wallet::new(OwnerId::new("bob").unwrap());

        let mut out = Vec::new();
        WalletWriter::new(&mut out)
            .write_wallets([&alice, &bob])
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "owner,balance,status\nalice,49900,enabled\nbob,0,disabled\n"
        );
    }

    #[test]
    fn test_no_wallets_writes_nothing() {
        let mut out = Vec::new();
        WalletWriter::new(&mut out)
            .write_wallets(Vec::<&Wallet>::new())
            .unwrap();
        assert!(out.is_empty());
    }
}
