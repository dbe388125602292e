//! Asset selections and the supply position form
//!
//! The form is the single mutable container describing what the user pays
//! with (source) and the reserve being supplied (destination). It is built by
//! the caller, injected into a session, and mutated only through typed
//! setters, so every write during the swap handoff is explicit and auditable.

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// A supported network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRef {
    pub chain_id: u64,
    pub name: String,
}

/// An ERC-20 reserve asset on some chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// One side of the position form.
///
/// `amount` is a human-unit decimal string as entered by the user or reported
/// by the transfer provider (e.g. "120.5"). Empty means not yet set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetSelection {
    pub token: Option<TokenRef>,
    pub chain: Option<ChainRef>,
    #[serde(default)]
    pub amount: String,
}

impl AssetSelection {
    pub fn new(token: TokenRef, chain: ChainRef, amount: impl Into<String>) -> Self {
        Self {
            token: Some(token),
            chain: Some(chain),
            amount: amount.into(),
        }
    }
}

/// Fields of the source selection written during the swap handoff, in their
/// fixed write order: amount, then chain, then token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceField {
    Amount,
    Chain,
    Token,
}

impl SourceField {
    /// First field written by a handoff.
    pub const FIRST: SourceField = SourceField::Amount;

    /// The field written after this one, if any.
    pub fn next(self) -> Option<SourceField> {
        match self {
            SourceField::Amount => Some(SourceField::Chain),
            SourceField::Chain => Some(SourceField::Token),
            SourceField::Token => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceField::Amount => "amount",
            SourceField::Chain => "chain",
            SourceField::Token => "token",
        }
    }
}

/// The position form for one supply dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionForm {
    source: AssetSelection,
    destination: AssetSelection,
}

impl PositionForm {
    pub fn new(source: AssetSelection, destination: AssetSelection) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn source(&self) -> &AssetSelection {
        &self.source
    }

    pub fn destination(&self) -> &AssetSelection {
        &self.destination
    }

    pub fn set_source_amount(&mut self, amount: String) {
        self.source.amount = amount;
    }

    pub fn set_source_chain(&mut self, chain: ChainRef) {
        self.source.chain = Some(chain);
    }

    pub fn set_source_token(&mut self, token: TokenRef) {
        self.source.token = Some(token);
    }

    /// Reset the source selection to mirror the destination reserve.
    ///
    /// Used when the dialog closes, after a failed swap, and whenever the
    /// user's selection returns to the destination asset. The amount is
    /// cleared so no partial handoff write survives the reset.
    pub fn mirror_destination(&mut self) {
        self.source.token = self.destination.token.clone();
        self.source.chain = self.destination.chain.clone();
        self.source.amount = String::new();
    }

    /// True when the source selection already is the destination reserve, so
    /// a supply needs no preceding swap.
    pub fn is_direct(&self) -> bool {
        match (
            &self.source.token,
            &self.source.chain,
            &self.destination.token,
            &self.destination.chain,
        ) {
            (Some(st), Some(sc), Some(dt), Some(dc)) => {
                st.address == dt.address && sc.chain_id == dc.chain_id
            }
            _ => false,
        }
    }

    /// True when the destination reserve metadata is fully present.
    pub fn destination_ready(&self) -> bool {
        self.destination.token.is_some() && self.destination.chain.is_some()
    }

    /// Why this form cannot be confirmed yet, if anything.
    pub fn missing_input(&self) -> Option<&'static str> {
        if self.destination.token.is_none() {
            return Some("destination token");
        }
        if self.destination.chain.is_none() {
            return Some("destination chain");
        }
        if self.source.token.is_none() {
            return Some("source token");
        }
        if self.source.chain.is_none() {
            return Some("source chain");
        }
        if self.source.amount.is_empty() {
            return Some("source amount");
        }
        None
    }
}
