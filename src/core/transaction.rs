// A transfer of value between two accounts. The hash covers the economic
// content only (sender, recipient, amount, fee, timestamp); status, block and
// pool references are bookkeeping that changes over the transaction's life.

use crate::core::monetary::{Amount, MIN_TRANSACTION_AMOUNT};
use crate::error::{BlockchainError, Result};
use crate::utils::{address_from_public_key, current_timestamp, validate_address, CryptoProvider, KeyPair};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum TransactionStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    hash: String,
    sender: String,
    recipient: String,
    amount: Amount,
    fee: Amount,
    timestamp: i64,
    signature: Vec<u8>,
    public_key: Vec<u8>,
    status: TransactionStatus,
    block_hash: Option<String>, // containing block once confirmed
    pool: Option<String>,       // holding pool while pending
    memo: Option<String>,
}

impl Transaction {
    /// Build a pending transaction stamped with the current time
    pub fn new(
        sender: &str,
        recipient: &str,
        amount: Amount,
        fee: Amount,
        crypto: &dyn CryptoProvider,
    ) -> Result<Transaction> {
        Self::new_at(sender, recipient, amount, fee, current_timestamp()?, crypto)
    }

    /// Build a pending transaction with an explicit timestamp (epoch millis)
    pub fn new_at(
        sender: &str,
        recipient: &str,
        amount: Amount,
        fee: Amount,
        timestamp: i64,
        crypto: &dyn CryptoProvider,
    ) -> Result<Transaction> {
        if !validate_address(sender) {
            return Err(BlockchainError::InvalidArgument(format!(
                "Invalid sender address: {sender}"
            )));
        }
        if !validate_address(recipient) {
            return Err(BlockchainError::InvalidArgument(format!(
                "Invalid recipient address: {recipient}"
            )));
        }
        if sender.eq_ignore_ascii_case(recipient) {
            return Err(BlockchainError::InvalidArgument(
                "Sender and recipient must differ".to_string(),
            ));
        }
        if amount < MIN_TRANSACTION_AMOUNT {
            return Err(BlockchainError::InvalidArgument(format!(
                "Amount {amount} is below the minimum of {MIN_TRANSACTION_AMOUNT}"
            )));
        }

        let mut tx = Transaction {
            hash: String::new(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            fee,
            timestamp,
            signature: vec![],
            public_key: vec![],
            status: TransactionStatus::Pending,
            block_hash: None,
            pool: None,
            memo: None,
        };
        tx.hash = tx.calculate_hash(crypto);
        Ok(tx)
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Transaction {
        self.memo = Some(memo.into());
        self
    }

    /// `sender ‖ recipient ‖ amount ‖ fee ‖ timestamp`, amounts in plain decimal
    pub fn hash_preimage(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.sender, self.recipient, self.amount, self.fee, self.timestamp
        )
    }

    pub fn calculate_hash(&self, crypto: &dyn CryptoProvider) -> String {
        crypto.hash(&self.hash_preimage())
    }

    /// Sign the transaction hash; the key must belong to the sender
    pub fn sign(&mut self, keys: &KeyPair, crypto: &dyn CryptoProvider) -> Result<()> {
        let signer = address_from_public_key(&keys.public_key);
        if !signer.eq_ignore_ascii_case(&self.sender) {
            return Err(BlockchainError::InvalidArgument(format!(
                "Key for {signer} cannot sign for sender {}",
                self.sender
            )));
        }
        self.signature = crypto.sign(self.hash.as_bytes(), &keys.pkcs8)?;
        self.public_key = keys.public_key.clone();
        Ok(())
    }

    /// True when the stored hash is current, the attached key belongs to the
    /// sender and the signature verifies over the hash
    pub fn verify_signature(&self, crypto: &dyn CryptoProvider) -> bool {
        if self.signature.is_empty() || self.public_key.is_empty() {
            return false;
        }
        if self.hash != self.calculate_hash(crypto) {
            return false;
        }
        if !address_from_public_key(&self.public_key).eq_ignore_ascii_case(&self.sender) {
            return false;
        }
        crypto.verify(self.hash.as_bytes(), &self.signature, &self.public_key)
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_sender(&self) -> &str {
        self.sender.as_str()
    }

    pub fn get_recipient(&self) -> &str {
        self.recipient.as_str()
    }

    pub fn get_amount(&self) -> Amount {
        self.amount
    }

    pub fn get_fee(&self) -> Amount {
        self.fee
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_status(&self) -> TransactionStatus {
        self.status
    }

    pub fn get_block_hash(&self) -> Option<&str> {
        self.block_hash.as_deref()
    }

    pub fn get_pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    pub fn get_memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn involves(&self, address: &str) -> bool {
        self.sender.eq_ignore_ascii_case(address) || self.recipient.eq_ignore_ascii_case(address)
    }

    pub(crate) fn set_pool(&mut self, pool: Option<String>) {
        self.pool = pool;
    }

    pub(crate) fn confirm(&mut self, block_hash: &str) {
        self.status = TransactionStatus::Confirmed;
        self.block_hash = Some(block_hash.to_string());
        self.pool = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::Sha256Crypto;

    pub(crate) const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    pub(crate) const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    pub(crate) fn sample_tx(fee_units: u64, timestamp: i64) -> Transaction {
        Transaction::new_at(
            ALICE,
            BOB,
            Amount::from_coins(1),
            Amount::from_units(fee_units),
            timestamp,
            &Sha256Crypto,
        )
        .unwrap()
    }

    #[test]
    fn test_hash_covers_economic_fields() {
        let tx = sample_tx(500, 1_700_000_000_000);
        assert_eq!(
            tx.hash_preimage(),
            format!("{ALICE}{BOB}10.000005{}", 1_700_000_000_000i64)
        );
        assert_eq!(tx.get_hash(), Sha256Crypto.hash(&tx.hash_preimage()));

        let memo = tx.clone().with_memo("rent");
        assert_eq!(memo.get_hash(), tx.get_hash());
        assert_ne!(sample_tx(501, 1_700_000_000_000).get_hash(), tx.get_hash());
    }

    #[test]
    fn test_rejects_malformed_input() {
        let crypto = Sha256Crypto;
        let one = Amount::from_coins(1);
        let err = Transaction::new_at("0x12", BOB, one, Amount::ZERO, 1, &crypto).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        assert!(Transaction::new_at(ALICE, ALICE, one, Amount::ZERO, 1, &crypto).is_err());
        assert!(Transaction::new_at(ALICE, BOB, Amount::ZERO, Amount::ZERO, 1, &crypto).is_err());
        assert!(
            Transaction::new_at(ALICE, BOB, MIN_TRANSACTION_AMOUNT, Amount::ZERO, 1, &crypto)
                .is_ok()
        );
    }

    #[test]
    fn test_signature_round_trip() {
        let crypto = Sha256Crypto;
        let keys = KeyPair::generate().unwrap();
        let mut tx = Transaction::new_at(
            &keys.address(),
            BOB,
            Amount::from_coins(2),
            Amount::from_units(10),
            42,
            &crypto,
        )
        .unwrap();
        assert!(!tx.verify_signature(&crypto));

        tx.sign(&keys, &crypto).unwrap();
        assert!(tx.verify_signature(&crypto));

        let mut tampered = tx.clone();
        tampered.amount = Amount::from_coins(200);
        assert!(!tampered.verify_signature(&crypto));

        let mut rekeyed = tx.clone();
        rekeyed.public_key = KeyPair::generate().unwrap().public_key;
        assert!(!rekeyed.verify_signature(&crypto));
    }

    #[test]
    fn test_sign_with_foreign_key_fails() {
        let crypto = Sha256Crypto;
        let mut tx = sample_tx(1, 1);
        let keys = KeyPair::generate().unwrap();
        assert!(tx.sign(&keys, &crypto).is_err());
    }

    #[test]
    fn test_confirm_clears_pool() {
        let mut tx = sample_tx(1, 1);
        tx.set_pool(Some("main".to_string()));
        assert_eq!(tx.get_pool(), Some("main"));
        tx.confirm("00abc");
        assert_eq!(tx.get_status(), TransactionStatus::Confirmed);
        assert_eq!(tx.get_block_hash(), Some("00abc"));
        assert_eq!(tx.get_pool(), None);
    }
}
