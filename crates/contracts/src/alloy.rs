pub mod networks {
    pub const MAINNET: u64 = 1;
    pub const SEPOLIA: u64 = 11155111;
    pub const HOLESKY: u64 = 17000;
    pub const ANVIL: u64 = 31337;

    /// Human readable name of a chain, used in log and error messages.
    pub fn name(chain_id: u64) -> &'static str {
        match chain_id {
            MAINNET => "mainnet",
            SEPOLIA => "sepolia",
            HOLESKY => "holesky",
            ANVIL => "anvil",
            _ => "unknown",
        }
    }
}

// Generate the bindings in a private module. That allows us to re-export all
// items in our own module while also adding some items ourselves.
#[allow(non_snake_case)]
mod SecretAuctionPrivate {
    alloy::sol!(
        #[allow(missing_docs)]
        #[sol(rpc)]
        contract SecretAuction {
            event AuctionCreated(uint256 indexed auctionId, address indexed creator, string itemName, uint256 endTime);
            event BidPlaced(uint256 indexed auctionId, address indexed bidder);
            event ResultsRevealed(uint256 indexed auctionId, address winner, uint256 winningBid);

            function createAuction(string memory itemName, string memory description, uint256 startingPrice, uint256 duration) external returns (uint256);
            function placeBid(uint256 auctionId, bytes32 encryptedBid, bytes calldata attestation) external;
            function revealResults(uint256 auctionId, address winner, uint256 winningBid) external;
            function endAuction(uint256 auctionId) external;

            function getAuction(uint256 auctionId) external view returns (address creator, string memory itemName, string memory description, uint256 startingPrice, bool isActive, bool resultsRevealed, uint256 createdAt, uint256 endTime, uint256 bidCount);
            function getResults(uint256 auctionId) external view returns (address winner, uint256 winningBid, bool revealed);
            function hasBid(uint256 auctionId, address bidder) external view returns (bool);
            function getUserAuctions(address user) external view returns (uint256[] memory);
            function getUserBids(address user) external view returns (uint256[] memory);
            function auctionCounter() external view returns (uint256);
        }
    );
}

#[allow(non_snake_case)]
pub mod SecretAuction {
    use alloy::providers::DynProvider;

    pub use super::SecretAuctionPrivate::*;
    pub type Instance = SecretAuction::SecretAuctionInstance<DynProvider>;
}
