//! Auction Registry
//!
//! Holds the single live auction: its seller, the ordered buyers and the
//! identifier/port allocator. All three operations run under one mutex.
//!
//! Registration order is allocate, sign, package, commit. A failure after
//! allocation rolls the identifier and port back so buyer identifiers stay
//! contiguous.

use std::str::FromStr;

use tokio::sync::Mutex;

use crate::error::AuctionError;
use crate::issuer::{CredentialBundle, CredentialIssuer};
use crate::types::{AuctionDescriptor, Participant, ParticipantId, Role, SELLER_IDENTIFIER};

pub const DEFAULT_BASE_PORT: u16 = 9000;

/// What to do when an address that already holds a seat asks to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Issue another seat. Descriptor lookups resolve to the first one.
    #[default]
    Allow,
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(DuplicatePolicy::Allow),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(format!("unknown duplicate policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// The seller listens on `base_port + 1`, buyers on the ports after it.
    pub base_port: u16,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Identifier and port reserved for a buyer that is not yet committed.
#[derive(Debug, PartialEq, Eq)]
pub struct Allocation {
    address: String,
    port: u16,
    identifier: ParticipantId,
}

impl Allocation {
    pub fn identifier(&self) -> ParticipantId {
        self.identifier
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[derive(Debug, Clone)]
pub struct Auction {
    seller: Participant,
    buyers: Vec<Participant>,
    next_port: u32,
    next_identifier: ParticipantId,
}

impl Auction {
    pub fn new(seller_address: &str, base_port: u16) -> Result<Self, AuctionError> {
        let mut next_port = u32::from(base_port) + 1;
        let seller_port = take_port(&mut next_port)?;

        Ok(Self {
            seller: Participant {
                address: seller_address.to_string(),
                port: seller_port,
                role: Role::Seller,
                identifier: SELLER_IDENTIFIER,
            },
            buyers: Vec::new(),
            next_port,
            next_identifier: 0,
        })
    }

    pub fn seller(&self) -> &Participant {
        &self.seller
    }

    pub fn buyers(&self) -> &[Participant] {
        &self.buyers
    }

    pub fn buyer_count(&self) -> usize {
        self.buyers.len()
    }

    /// All participants, seller first, then buyers in registration order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        std::iter::once(&self.seller).chain(self.buyers.iter())
    }

    /// First participant registered from `address`.
    pub fn find(&self, address: &str) -> Option<&Participant> {
        self.participants().find(|p| p.address == address)
    }

    /// Reserve the next identifier and port for `address`.
    pub fn allocate(&mut self, address: &str) -> Result<Allocation, AuctionError> {
        let port = take_port(&mut self.next_port)?;
        let identifier = self.next_identifier;
        self.next_identifier += 1;

        Ok(Allocation {
            address: address.to_string(),
            port,
            identifier,
        })
    }

    /// Record an allocated buyer.
    pub fn commit(&mut self, allocation: Allocation) -> &Participant {
        self.buyers.push(Participant {
            address: allocation.address,
            port: allocation.port,
            role: Role::Buyer,
            identifier: allocation.identifier,
        });
        &self.buyers[self.buyers.len() - 1]
    }

    /// Return an uncommitted allocation to the allocator. Only the most recent
    /// allocation can be returned.
    pub fn rollback(&mut self, allocation: Allocation) -> Result<(), AuctionError> {
        let is_latest = allocation.identifier + 1 == self.next_identifier
            && u32::from(allocation.port) + 1 == self.next_port;
        if !is_latest {
            return Err(AuctionError::AllocationRollback(format!(
                "identifier {} port {} is not the latest allocation",
                allocation.identifier, allocation.port
            )));
        }

        self.next_identifier -= 1;
        self.next_port -= 1;
        Ok(())
    }

    pub fn descriptor_for(&self, address: &str) -> Result<AuctionDescriptor, AuctionError> {
        let participant = self
            .find(address)
            .ok_or_else(|| AuctionError::NotRegistered(address.to_string()))?;

        Ok(AuctionDescriptor {
            self_identifier: participant.identifier,
            seller: self.seller.endpoint(),
            hosts: self.participants().map(Participant::endpoint).collect(),
        })
    }
}

fn take_port(next_port: &mut u32) -> Result<u16, AuctionError> {
    let port = u16::try_from(*next_port).map_err(|_| AuctionError::PortsExhausted(*next_port))?;
    *next_port += 1;
    Ok(port)
}

/// A committed buyer seat and its credentials.
#[derive(Debug)]
pub struct Registration {
    pub participant: Participant,
    pub bundle: CredentialBundle,
}

pub struct AuctionRegistry {
    auction: Mutex<Option<Auction>>,
    issuer: CredentialIssuer,
    config: RegistryConfig,
}

impl AuctionRegistry {
    pub fn new(issuer: CredentialIssuer, config: RegistryConfig) -> Self {
        Self {
            auction: Mutex::new(None),
            issuer,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Replace any existing auction with a fresh one sold by `seller_address`.
    pub async fn create_auction(&self, seller_address: &str) -> Result<Participant, AuctionError> {
        let auction = Auction::new(seller_address, self.config.base_port)?;
        let seller = auction.seller().clone();

        let mut guard = self.auction.lock().await;
        if let Some(previous) = guard.replace(auction) {
            tracing::info!(
                discarded_buyers = previous.buyer_count(),
                "Discarded previous auction"
            );
        }

        tracing::info!(seller = %seller.endpoint(), "Created auction");
        Ok(seller)
    }

    /// Register `buyer_address` and issue its credentials.
    pub async fn register_buyer(&self, buyer_address: &str) -> Result<Registration, AuctionError> {
        // Fail fast before spending time on key generation.
        {
            let guard = self.auction.lock().await;
            let auction = guard.as_ref().ok_or(AuctionError::NoActiveAuction)?;
            self.check_duplicate(auction, buyer_address)?;
        }

        let prepared = self.issuer.prepare(buyer_address)?;

        let mut guard = self.auction.lock().await;
        let auction = guard.as_mut().ok_or(AuctionError::NoActiveAuction)?;
        self.check_duplicate(auction, buyer_address)?;

        let allocation = auction.allocate(buyer_address)?;
        let identifier = allocation.identifier();

        match self.issuer.complete(prepared, identifier).await {
            Ok(bundle) => {
                let participant = auction.commit(allocation).clone();
                tracing::info!(
                    buyer = %participant.endpoint(),
                    identifier,
                    "Registered buyer"
                );
                Ok(Registration {
                    participant,
                    bundle,
                })
            }
            Err(e) => {
                let port = allocation.port();
                auction.rollback(allocation)?;
                tracing::warn!(
                    buyer = buyer_address,
                    identifier,
                    port,
                    error = %e,
                    "Issuance failed, allocation rolled back"
                );
                Err(e.into())
            }
        }
    }

    pub async fn descriptor_for(&self, address: &str) -> Result<AuctionDescriptor, AuctionError> {
        let guard = self.auction.lock().await;
        guard
            .as_ref()
            .ok_or(AuctionError::NoActiveAuction)?
            .descriptor_for(address)
    }

    /// Copy of the current auction state.
    pub async fn snapshot(&self) -> Option<Auction> {
        self.auction.lock().await.clone()
    }

    fn check_duplicate(&self, auction: &Auction, address: &str) -> Result<(), AuctionError> {
        if self.config.duplicate_policy == DuplicatePolicy::Reject && auction.find(address).is_some()
        {
            return Err(AuctionError::AlreadyRegistered(address.to_string()));
        }
        Ok(())
    }
}
