//! Bundle signing with the sponsor and origin keys

use crate::bundle::{Bundle, SignedBundle, SignedTransaction, SignerIdentity};
use crate::chain::ChainData;
use crate::error::{RescueError, RescueResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use std::collections::BTreeMap;
use tracing::debug;

/// Next nonce per sending account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonceBook {
    next: BTreeMap<Address, u64>,
}

impl NonceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the current nonce of every account
    pub async fn fetch(chain: &dyn ChainData, accounts: &[Address]) -> RescueResult<Self> {
        let mut book = Self::new();
        for &account in accounts {
            if !book.next.contains_key(&account) {
                let nonce = chain.transaction_count(account, None).await?;
                book.set(account, nonce);
            }
        }
        Ok(book)
    }

    pub fn set(&mut self, account: Address, nonce: u64) {
        self.next.insert(account, nonce);
    }

    pub fn get(&self, account: &Address) -> Option<u64> {
        self.next.get(account).copied()
    }

    /// Hand out the next nonce for `account`
    fn allocate(&mut self, account: Address) -> RescueResult<u64> {
        let next = self.next.get_mut(&account).ok_or_else(|| {
            RescueError::Signing(format!("No nonce known for {:?}", account))
        })?;
        let nonce = *next;
        *next += 1;
        Ok(nonce)
    }
}

/// Signs bundle slots with the key matching each slot's identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BundleSigner: Send + Sync {
    /// Address behind an identity
    fn address(&self, identity: SignerIdentity) -> Address;

    /// Sign every slot in order, assigning nonces from `nonces`
    async fn sign(&self, bundle: &Bundle, nonces: &NonceBook) -> RescueResult<SignedBundle>;
}

/// Signer holding both keys in memory
pub struct LocalBundleSigner {
    sponsor: LocalWallet,
    origin: LocalWallet,
    chain_id: u64,
}

impl LocalBundleSigner {
    pub fn new(sponsor: LocalWallet, origin: LocalWallet, chain_id: u64) -> Self {
        Self {
            sponsor: sponsor.with_chain_id(chain_id),
            origin: origin.with_chain_id(chain_id),
            chain_id,
        }
    }

    /// Load both keys from the named environment variables
    pub fn from_env(sponsor_env: &str, origin_env: &str, chain_id: u64) -> RescueResult<Self> {
        let sponsor = load_wallet(sponsor_env)?;
        let origin = load_wallet(origin_env)?;

        if sponsor.address() == origin.address() {
            return Err(RescueError::Wallet(
                "Sponsor and origin keys must differ".to_string(),
            ));
        }

        Ok(Self::new(sponsor, origin, chain_id))
    }

    fn wallet(&self, identity: SignerIdentity) -> &LocalWallet {
        match identity {
            SignerIdentity::Sponsor => &self.sponsor,
            SignerIdentity::Origin => &self.origin,
        }
    }
}

#[async_trait]
impl BundleSigner for LocalBundleSigner {
    fn address(&self, identity: SignerIdentity) -> Address {
        self.wallet(identity).address()
    }

    async fn sign(&self, bundle: &Bundle, nonces: &NonceBook) -> RescueResult<SignedBundle> {
        let mut nonces = nonces.clone();
        let mut transactions = Vec::with_capacity(bundle.slots().len());

        for slot in bundle.slots() {
            let wallet = self.wallet(slot.signer);
            let from = wallet.address();
            let nonce = nonces.allocate(from)?;

            let tx: TypedTransaction = TransactionRequest::new()
                .from(from)
                .to(slot.operation.target)
                .data(slot.operation.calldata.clone())
                .value(slot.operation.value)
                .gas(slot.gas_limit)
                .gas_price(slot.gas_price)
                .nonce(nonce)
                .chain_id(self.chain_id)
                .into();

            let signature = wallet
                .sign_transaction(&tx)
                .await
                .map_err(|e| RescueError::Signing(e.to_string()))?;
            let raw = tx.rlp_signed(&signature);
            let hash = H256::from(keccak256(&raw));

            debug!("Signed {} slot {:?} with nonce {}", slot.signer, hash, nonce);

            transactions.push(SignedTransaction {
                signer: slot.signer,
                from,
                to: slot.operation.target,
                nonce,
                gas_limit: slot.gas_limit,
                hash,
                raw,
                label: slot.operation.label.clone(),
            });
        }

        Ok(SignedBundle::new(transactions, bundle.gas_price()))
    }
}

/// Load a private key from an environment variable
pub fn load_wallet(env_name: &str) -> RescueResult<LocalWallet> {
    let key = std::env::var(env_name).map_err(|_| {
        RescueError::Wallet(format!("Must provide the {} environment variable", env_name))
    })?;

    key.trim()
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| RescueError::Wallet(format!("Invalid private key in {}: {}", env_name, e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bundle::BundleAssembler;
    use crate::chain::MockChainData;
    use crate::tx::FundingCalculator;
    use crate::bundle::Operation;

    pub(crate) const SPONSOR_KEY: &str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    pub(crate) const ORIGIN_KEY: &str =
        "8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";

    pub(crate) fn test_signer(chain_id: u64) -> LocalBundleSigner {
        LocalBundleSigner::new(
            SPONSOR_KEY.parse().unwrap(),
            ORIGIN_KEY.parse().unwrap(),
            chain_id,
        )
    }

    fn two_op_bundle(signer: &LocalBundleSigner, gas_price: U256) -> Bundle {
        let origin = signer.address(SignerIdentity::Origin);
        let operations = vec![
            Operation::call(Address::from_low_u64_be(0xa1), vec![1, 2, 3, 4], "withdraw"),
            Operation::call(Address::from_low_u64_be(0xa2), vec![5, 6, 7, 8], "transfer"),
        ];
        let estimates = vec![U256::from(80_000), U256::from(50_000)];
        let (funding, _) = FundingCalculator::new(origin)
            .compute(&estimates, gas_price)
            .unwrap();
        BundleAssembler::assemble(funding, &operations, &estimates, gas_price).unwrap()
    }

    #[tokio::test]
    async fn test_nonces_allocated_per_identity() {
        let signer = test_signer(1);
        let sponsor = signer.address(SignerIdentity::Sponsor);
        let origin = signer.address(SignerIdentity::Origin);

        let mut nonces = NonceBook::new();
        nonces.set(sponsor, 12);
        nonces.set(origin, 3);

        let signed = signer
            .sign(&two_op_bundle(&signer, U256::from(30_000_000_000u64)), &nonces)
            .await
            .unwrap();

        let txs = signed.transactions();
        assert_eq!(txs.len(), 3);
        assert_eq!((txs[0].from, txs[0].nonce), (sponsor, 12));
        assert_eq!((txs[1].from, txs[1].nonce), (origin, 3));
        assert_eq!((txs[2].from, txs[2].nonce), (origin, 4));
        assert_eq!(signed.first_nonces()[&origin], 3);
    }

    #[tokio::test]
    async fn test_signing_is_deterministic_and_price_sensitive() {
        let signer = test_signer(1);
        let mut nonces = NonceBook::new();
        nonces.set(signer.address(SignerIdentity::Sponsor), 0);
        nonces.set(signer.address(SignerIdentity::Origin), 0);

        let low = two_op_bundle(&signer, U256::from(30_000_000_000u64));
        let high = two_op_bundle(&signer, U256::from(31_000_000_000u64));

        let first = signer.sign(&low, &nonces).await.unwrap();
        let again = signer.sign(&low, &nonces).await.unwrap();
        let repriced = signer.sign(&high, &nonces).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first.hashes(), repriced.hashes());
    }

    #[tokio::test]
    async fn test_missing_nonce_is_an_error() {
        let signer = test_signer(1);
        let bundle = two_op_bundle(&signer, U256::from(1));
        let err = signer.sign(&bundle, &NonceBook::new()).await.unwrap_err();
        assert!(matches!(err, RescueError::Signing(_)));
    }

    #[tokio::test]
    async fn test_fetch_queries_each_account_once() {
        let a = Address::from_low_u64_be(1);
        let b = Address::from_low_u64_be(2);
        let mut chain = MockChainData::new();
        chain
            .expect_transaction_count()
            .times(2)
            .returning(|address, _| Ok(address.to_low_u64_be() * 10));

        let book = NonceBook::fetch(&chain, &[a, b, a]).await.unwrap();
        assert_eq!(book.get(&a), Some(10));
        assert_eq!(book.get(&b), Some(20));
    }

    #[test]
    fn test_load_wallet_reports_variable_name() {
        let err = load_wallet("RESCUE_TEST_UNSET_KEY").unwrap_err();
        assert!(err.to_string().contains("RESCUE_TEST_UNSET_KEY"));

        std::env::set_var("RESCUE_TEST_ORIGIN_KEY", format!("0x{}", ORIGIN_KEY));
        let wallet = load_wallet("RESCUE_TEST_ORIGIN_KEY").unwrap();
        assert_eq!(wallet.address(), test_signer(1).address(SignerIdentity::Origin));
    }
}
