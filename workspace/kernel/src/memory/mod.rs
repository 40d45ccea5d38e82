//! Virtual memory: user pool, page directory, supplementary page table,
//! frame table with eviction, swap, and user-pointer validation.

pub mod addr;
pub mod frame;
pub mod page;
pub mod pagedir;
pub mod pool;
pub mod swap;
pub mod usermem;

pub use addr::{VirtPage, PAGE_SIZE, STACK_LIMIT, USER_TOP};
pub use frame::{FrameInfo, FrameTable};
pub use page::{MapId, PageDescriptor, PageLocation, SuppPageTable};
pub use pool::{KPage, UserPool};
pub use swap::{SwapManager, SwapSlot};
pub use usermem::{Access, PinnedPages};
