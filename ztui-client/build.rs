#[cfg(target_os = "windows")]
fn main() {
    // Version info shown in Explorer's file properties dialog.
    let mut res = winres::WindowsResource::new();
    res.set("ProductName", "ztui")
        .set("FileDescription", "ZeroTier One desktop monitor")
        .set("LegalCopyright", "MIT");
    if let Err(err) = res.compile() {
        println!("cargo:warning=failed to embed version resource: {err}");
    }
}

#[cfg(not(target_os = "windows"))]
fn main() {
    // No-op on non-Windows.
}
