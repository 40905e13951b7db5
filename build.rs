#[cfg(windows)]
fn main() {
    let mut res = winres::WindowsResource::new();
    if std::path::Path::new("icons/icon.ico").exists() {
        res.set_icon("icons/icon.ico");
    }
    res.set("ProductName", "DeskBridge");
    res.set("FileDescription", "DeskBridge - Desktop Presentation Engine");
    res.set("LegalCopyright", "© 2025 DeskBridge Contributors");
    res.set("CompanyName", "DeskBridge");
    res.set("OriginalFilename", "deskbridge.exe");

    if let Err(e) = res.compile() {
        eprintln!("Failed to compile Windows resource: {}", e);
    }
}

#[cfg(not(windows))]
fn main() {
}
