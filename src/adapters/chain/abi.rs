//! Solidity bindings for the DTF contracts and ERC-20.
//!
//! Only call encoding/decoding is generated here; transport goes through
//! the shared type-erased provider.

use alloy::sol;

sol! {
    /// DTFMarket: basket markets, share trading and settlement.
    interface IDTFMarket {
        function nextDtfId() external view returns (uint256);

        // creator, name, expiryTime, targetValuation, isTargetHigher,
        // isSettled, yesWon, yesToken, noToken, then three counters
        // this client does not read.
        function dtfs(uint256 dtfId) external view returns (
            address, string, uint256, uint256, bool, bool, bool, address, address, uint256, uint256, uint256
        );

        function getSharePrices(uint256 dtfId) external view returns (uint256 yesPrice, uint256 noPrice);
        function getDTFPoolInfo(uint256 dtfId) external view returns (uint256 poolYes, uint256 poolNo, uint256 totalVolume);
        function getCurrentValuation(uint256 dtfId) external view returns (uint256 valuation);
        function getDTFLockedTokens(uint256 dtfId) external view returns (address[] tokens, uint256[] amounts);

        function buyShares(uint256 dtfId, bool isYes, uint256 amount) external;
        function settleDTF(uint256 dtfId) external;
        function claimWinnings(uint256 dtfId) external;
        function withdrawTokens(uint256 dtfId) external;
        function createDTF(
            string name,
            address[] tokens,
            uint256[] amounts,
            uint256 expiryTime,
            uint256 targetValuation,
            bool isTargetHigher
        ) external;
    }

    /// DTFPriceOracle: USD valuation of a token basket.
    interface IDTFPriceOracle {
        function calculateValuation(address[] tokens, uint256[] amounts) external view returns (uint256 valuation);
    }

    interface IERC20 {
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}
