//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Formats the permission bits of a mode the way `ls -l` prints them, e.g. `rwxr-x---`.
///
/// ## Examples
///
/// ```
/// use monoflat::utils::format_mode;
///
/// assert_eq!(format_mode(0o755), "rwxr-xr-x");
/// assert_eq!(format_mode(0o40200), "-w-------");
/// ```
pub fn format_mode(mode: u32) -> String {
    const SYMBOLS: [char; 3] = ['r', 'w', 'x'];

    (0..9)
        .map(|bit| {
            if mode & (0o400 >> bit) != 0 {
                SYMBOLS[bit % 3]
            } else {
                '-'
            }
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
