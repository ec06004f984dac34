// HTML fragments and pages for the search UI
//
// Fragments are swapped into `#results` by htmx; pages carry the full RTL layout.

use std::fmt::{self, Write as _};

use chrono::{Datelike, Utc};

use crate::{
    outcome::{LookupOutcome, StudentResult},
    query::{Level, ValidationError, REGIONS, UNSELECTED},
};

/// Status value the upstream uses for a passing student.
pub const PASSED_STATUS: &str = "ن";

/// Rendered markup. Every interpolated value has already been escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment(String);

impl Fragment {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const WARNING_ICON: &str = r#"<svg class="w-8 h-8 mx-auto text-yellow-500" fill="none" stroke="currentColor" viewBox="0 0 24 24"><path stroke-linecap="round" stroke-linejoin="round" stroke-width="2" d="M12 9v2m0 4h.01m-6.938 4h13.856c1.54 0 2.502-1.667 1.732-2.5L13.732 4c-.77-.833-1.964-.833-2.732 0L3.732 16.5c-.77.833.192 2.5 1.732 2.5z"></path></svg>"#;
const ERROR_ICON: &str = r#"<svg class="w-8 h-8 mx-auto text-red-500" fill="none" stroke="currentColor" viewBox="0 0 24 24"><path stroke-linecap="round" stroke-linejoin="round" stroke-width="2" d="M12 8v4m0 4h.01M21 12a9 9 0 11-18 0 9 9 0 0118 0z"></path></svg>"#;
const SUCCESS_ICON: &str = r#"<svg class="w-8 h-8 text-green-600" fill="none" stroke="currentColor" viewBox="0 0 24 24"><path stroke-linecap="round" stroke-linejoin="round" stroke-width="2" d="M9 12l2 2 4-4m6 2a9 9 0 11-18 0 9 9 0 0118 0z"></path></svg>"#;

pub fn validation_error(err: ValidationError) -> Fragment {
    Fragment(format!(
        r#"<div class="text-center p-4 bg-red-100 border border-red-400 text-red-700 rounded-md"><p class="font-medium">{}</p></div>"#,
        escape(err.user_message())
    ))
}

pub fn outcome(outcome: &LookupOutcome) -> Fragment {
    match outcome {
        LookupOutcome::Found(student) => results_table(student),
        LookupOutcome::NotFound => not_found(),
        LookupOutcome::Failed {
            attempts,
            last_error,
        } => failure(*attempts, last_error),
    }
}

pub fn not_found() -> Fragment {
    Fragment(format!(
        r#"<div class="text-center p-4 bg-yellow-100 border border-yellow-400 text-yellow-700 rounded-md"><div class="mb-2">{WARNING_ICON}</div><p class="font-medium mb-2">لم يتم العثور على النتيجة</p><p class="text-sm">تأكد من صحة البيانات المدخلة وحاول مرة أخرى</p></div>"#
    ))
}

pub fn failure(attempts: u32, last_error: &str) -> Fragment {
    let headline = if attempts > 1 {
        format!("تم المحاولة {attempts} مرات ولم نتمكن من الوصول للخادم")
    } else {
        "حدث خطأ في الاتصال".to_string()
    };

    Fragment(format!(
        r#"<div class="text-center p-4 bg-red-100 border border-red-400 text-red-700 rounded-md"><div class="mb-2">{ERROR_ICON}</div><p class="font-medium mb-2">{}</p><p class="text-sm">يرجى المحاولة مرة أخرى أو التواصل مع الدعم الفني</p><p class="text-xs mt-2 text-gray-600">Error: {}</p></div>"#,
        escape(&headline),
        escape(last_error)
    ))
}

pub fn results_table(student: &StudentResult) -> Fragment {
    let mut rows = vec![
        ("رقم الجلوس", format!(r#"<span class="font-mono">{}</span>"#, escape(&student.seat_number))),
        ("اسم الطالب", escape(&student.student_name)),
        ("المحافظة", escape(&student.region)),
        ("المدرسة", escape(&student.school)),
    ];
    if let Some(total) = &student.total {
        rows.push((
            "المجموع",
            format!(
                r#"<span class="font-bold text-lg text-green-600">{}</span>"#,
                escape(total)
            ),
        ));
    }
    if let Some(status) = &student.status {
        let colour = if status == PASSED_STATUS {
            "text-green-600"
        } else {
            "text-red-600"
        };
        rows.push((
            "الحالة",
            format!(r#"<span class="font-bold {colour}">{}</span>"#, escape(status)),
        ));
    }

    let mut body = String::new();
    for (i, (label, value)) in rows.iter().enumerate() {
        let shade = if i % 2 == 0 { r#" class="bg-gray-50""# } else { "" };
        let _ = write!(
            body,
            r#"<tr{shade}><td class="border border-gray-300 px-4 py-3 font-semibold text-gray-700 text-right">{label}</td><td class="border border-gray-300 px-4 py-3 text-right">{value}</td></tr>"#
        );
    }

    Fragment(format!(
        r#"<div class="p-6 bg-white rounded-lg shadow-md border border-gray-200"><div class="text-center mb-6"><div class="w-16 h-16 bg-green-100 rounded-full flex items-center justify-center mx-auto mb-4">{SUCCESS_ICON}</div><h3 class="text-xl font-bold text-gray-800 mb-2">تم العثور على النتيجة</h3><p class="text-sm text-gray-600">تفاصيل النتيجة أدناه</p></div><div class="overflow-x-auto"><table class="w-full border-collapse border border-gray-300 text-sm"><tbody>{body}</tbody></table></div><div class="mt-6 p-4 bg-blue-50 border border-blue-200 rounded-md"><p class="text-sm text-blue-700">هذه النتيجة الرسمية من قاعدة البيانات المركزية</p></div></div>"#
    ))
}

// Full pages

pub const PAGE_TITLE: &str = "نظام البحث عن النتائج";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavItem {
    Home,
    Search,
}

const NAV: &[(Option<NavItem>, &str, &str)] = &[
    (Some(NavItem::Home), "الرئيسية", "/"),
    (Some(NavItem::Search), "البحث عن النتائج", "/search"),
    (None, "بوابة الواقع", "https://waq3.net"),
];

fn header(active: NavItem) -> String {
    let mut links = String::new();
    for (item, name, href) in NAV {
        let class = if *item == Some(active) {
            "border-b-2 border-blue-500 font-bold"
        } else {
            "hover:text-blue-500 hover:border-b-2 hover:border-blue-500"
        };
        let _ = write!(
            links,
            r#"<a href="{href}" class="py-4 px-2 text-gray-800 transition duration-300 {class}">{name}</a>"#
        );
    }
    format!(
        r#"<nav class="bg-white shadow-lg"><div class="max-w-6xl mx-auto px-4"><div class="flex justify-start"><div class="flex space-x-reverse space-x-7">{links}</div></div></div></nav>"#
    )
}

fn footer() -> String {
    format!(
        r#"<footer class="bg-gray-800 text-white py-4 fixed bottom-0 w-full"><div class="max-w-6xl mx-auto text-center"><p>&copy; {} جميع الحقوق محفوظة لبوابة الواقع</p></div></footer>"#,
        Utc::now().year()
    )
}

/// Shown in turn while a search is in flight; a lookup can take ~24s with retries.
pub const LOADING_MESSAGES: [&str; 5] = [
    "جاري البحث...",
    "نحاول الاتصال بالخادم...",
    "نحاول مرة أخرى، انتظر قليلاً...",
    "آخر محاولة، تحمل معنا قليلاً...",
    "تقريباً انتهينا، ثواني معدودة...",
];

const LOADING_ROTATION_MS: u32 = 3000;

fn loading_script() -> String {
    let messages = serde_json::to_string(&LOADING_MESSAGES).unwrap_or_else(|_| "[]".to_string());
    format!(
        r##"let loadingInterval = null;
document.addEventListener("DOMContentLoaded", function () {{
  const messages = {messages};
  document.body.addEventListener("htmx:beforeRequest", function () {{
    const loadingText = document.getElementById("loadingText");
    if (!loadingText || messages.length === 0) return;
    let index = 0;
    loadingText.textContent = messages[0];
    clearInterval(loadingInterval);
    loadingInterval = setInterval(function () {{
      index = (index + 1) % messages.length;
      loadingText.textContent = messages[index];
    }}, {LOADING_ROTATION_MS});
  }});
  document.body.addEventListener("htmx:afterRequest", function () {{
    clearInterval(loadingInterval);
    loadingInterval = null;
  }});
}});"##
    )
}

fn layout(active: NavItem, main: &str) -> Fragment {
    Fragment(format!(
        r#"<!DOCTYPE html>
<html lang="ar" dir="rtl">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1.0" />
<script src="https://unpkg.com/htmx.org@1.9.3"></script>
<script src="https://cdn.tailwindcss.com"></script>
<style>.htmx-indicator{{opacity:0;transition:opacity 200ms ease-in}}.htmx-request .htmx-indicator,.htmx-request.htmx-indicator{{opacity:1}}</style>
<script>{}</script>
<title>{PAGE_TITLE}</title>
</head>
<body hx-boost="true">
{}
<main class="pb-16"><div class="min-h-screen bg-gradient-to-br from-blue-50 to-indigo-100 py-8 px-4">{main}</div></main>
{}
</body>
</html>"#,
        loading_script(),
        header(active),
        footer()
    ))
}

pub fn home_page() -> Fragment {
    layout(
        NavItem::Home,
        r#"<div class="max-w-4xl mx-auto text-center"><h1 class="text-4xl font-bold text-gray-800 mb-8">مرحباً بك في نظام النتائج</h1><p class="text-lg text-gray-600 mb-8">ابحث عن نتائج الشهادة الابتدائية والإعدادية من مكان واحد</p><div class="bg-white rounded-lg shadow-lg p-8 max-w-md mx-auto"><h2 class="text-2xl font-bold text-gray-800 mb-4">البحث عن النتائج</h2><p class="text-gray-600 mb-6">اختر المرحلة التعليمية والمنطقة وأدخل رقم الجلوس للحصول على النتيجة</p><a href="/search" class="inline-block w-full bg-blue-600 hover:bg-blue-700 text-white font-medium py-3 px-6 rounded-md">ابدأ البحث</a></div></div>"#,
    )
}

pub fn search_page() -> Fragment {
    const SELECT_CLASS: &str = "w-full px-3 py-2 border border-gray-300 rounded-md shadow-sm text-right";

    let mut levels = format!(r#"<option value="{UNSELECTED}">اختر المرحلة</option>"#);
    for level in Level::ALL {
        let _ = write!(levels, r#"<option value="{}">{}</option>"#, level.id(), level.label());
    }

    let mut regions = format!(r#"<option value="{UNSELECTED}">اختر</option>"#);
    for (id, label) in REGIONS {
        let _ = write!(regions, r#"<option value="{id}">{label}</option>"#);
    }

    let first = LOADING_MESSAGES[0];
    let form = format!(
        r##"<div class="container mx-auto"><div class="max-w-2xl mx-auto p-6 bg-white rounded-lg shadow-lg border border-gray-200"><div class="text-center mb-8"><h1 class="text-3xl font-bold text-gray-800 mb-4">البحث عن النتائج - جميع المراحل التعليمية</h1></div><form hx-post="/search-results" hx-target="#results" hx-swap="innerHTML" hx-indicator="#loading" class="space-y-6" id="searchForm"><div class="grid grid-cols-1 md:grid-cols-3 gap-6"><div class="mb-6"><label for="ddlGrade" class="block text-sm font-medium text-gray-700 mb-2">المرحلة</label><select id="ddlGrade" name="grade" class="{SELECT_CLASS}" required>{levels}</select></div><div class="mb-6"><label for="ddlArea" class="block text-sm font-medium text-gray-700 mb-2">المنطقة</label><select id="ddlArea" name="area" class="{SELECT_CLASS}" required>{regions}</select></div><div class="mb-6"><label for="txtNo" class="block text-sm font-medium text-gray-700 mb-2">رقم الجلوس</label><input id="txtNo" name="seatNumber" type="text" maxlength="7" placeholder="ادخل رقم الجلوس" class="{SELECT_CLASS}" required /></div></div><div class="flex flex-col items-center space-y-4"><button type="submit" class="w-full bg-blue-600 hover:bg-blue-700 text-white font-medium py-2 px-4 rounded-md" onclick="document.getElementById('results').innerHTML = '';">بحث</button><div id="loading" class="htmx-indicator"><span id="loadingText" class="text-sm text-gray-600">{first}</span></div></div></form><div id="results" class="mt-8"></div></div></div>"##
    );

    layout(NavItem::Search, &form)
}
