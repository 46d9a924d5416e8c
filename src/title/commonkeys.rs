// title/commonkeys.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck

const COMMON_KEYS: [&str; 6] = [
    "64c5fd55dd3ad988325baaec5243db98",
    "4aaa3d0e27d4d728d0b1b433f0f9cbc8",
    "fbb0ef8cdbb0d8e453cd99344371697f",
    "25959b7ad0409f72684198ba2ecd7dc6",
    "7ada22caffc476cc8297a0c7ceeeeebe",
    "a5051ca1b37dcf3afbcf8cc1edd9ce02",
];

/// Returns the common key for the specified index, or None if the index is
/// outside the six keys shared across the CTR ecosystem. The ticket selects
/// the key used to decrypt its title key by this index.
pub fn get_common_key(index: u8) -> Option<[u8; 16]> {
    let key = COMMON_KEYS.get(index as usize)?;
    Some(hex::decode(key).unwrap().try_into().unwrap())
}
