//! App name to Android package mapping used by `Launch`

use phf::phf_map;

/// Human-readable app names mapped to their package identifiers
pub static APP_PACKAGES: phf::Map<&'static str, &'static str> = phf_map! {
    "Settings" => "com.android.settings",
    "Chrome" => "com.android.chrome",
    "Gmail" => "com.google.android.gm",
    "Google Maps" => "com.google.android.apps.maps",
    "YouTube" => "com.google.android.youtube",
    "Play Store" => "com.android.vending",
    "Photos" => "com.google.android.apps.photos",
    "Camera" => "com.android.camera2",
    "Clock" => "com.google.android.deskclock",
    "Calendar" => "com.google.android.calendar",
    "Contacts" => "com.google.android.contacts",
    "Messages" => "com.google.android.apps.messaging",
    "Phone" => "com.google.android.dialer",
    "Files" => "com.google.android.apps.nbu.files",
    "Calculator" => "com.google.android.calculator",
    "WhatsApp" => "com.whatsapp",
    "Telegram" => "org.telegram.messenger",
    "Spotify" => "com.spotify.music",
    "WeChat" => "com.tencent.mm",
    "QQ" => "com.tencent.mobileqq",
    "Alipay" => "com.eg.android.AlipayGphone",
    "Taobao" => "com.taobao.taobao",
    "JD" => "com.jingdong.app.mall",
    "Meituan" => "com.sankuai.meituan",
    "Weibo" => "com.sina.weibo",
    "Douyin" => "com.ss.android.ugc.aweme",
    "Xiaohongshu" => "com.xingin.xhs",
    "Bilibili" => "tv.danmaku.bili",
    "Amap" => "com.autonavi.minimap",
};

/// Resolve an app name to its package, ignoring ASCII case
pub fn get_package_name(app_name: &str) -> Option<&'static str> {
    if let Some(pkg) = APP_PACKAGES.get(app_name) {
        return Some(pkg);
    }
    APP_PACKAGES
        .entries()
        .find(|(name, _)| name.eq_ignore_ascii_case(app_name.trim()))
        .map(|(_, pkg)| *pkg)
}

/// Reverse lookup: package identifier to app name
pub fn get_app_name(package: &str) -> Option<&'static str> {
    APP_PACKAGES
        .entries()
        .find(|(_, pkg)| **pkg == package)
        .map(|(name, _)| *name)
}

/// All supported app names, sorted
pub fn list_supported_apps() -> Vec<&'static str> {
    let mut apps: Vec<&'static str> = APP_PACKAGES.keys().copied().collect();
    apps.sort_unstable();
    apps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_lookup() {
        assert_eq!(get_package_name("Settings"), Some("com.android.settings"));
        assert_eq!(get_package_name("settings"), Some("com.android.settings"));
        assert_eq!(get_package_name("No Such App"), None);
    }

    #[test]
    fn test_app_name_lookup() {
        assert_eq!(get_app_name("com.tencent.mm"), Some("WeChat"));
        assert_eq!(get_app_name("com.example.unknown"), None);
    }

    #[test]
    fn test_list_is_sorted() {
        let apps = list_supported_apps();
        assert!(apps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(apps.len(), APP_PACKAGES.len());
    }
}
