//! 口令页与上传表单（纯静态 HTML）。

const LOGIN_HEAD: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Upload login</title></head>
<body>
<form method="post" action="/upload-auth">
  <label>Password <input type="password" name="password" autofocus></label>
  <button type="submit">Continue</button>
</form>
"#;

pub const UPLOAD_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Upload</title></head>
<body>
<form method="post" action="/upload" enctype="multipart/form-data">
  <input type="file" name="media" multiple accept="image/*,video/*">
  <input type="text" name="description" placeholder="Description">
  <button type="submit">Upload</button>
</form>
</body>
</html>
"#;

pub fn login_page(error: Option<&str>) -> String {
    let mut page = String::from(LOGIN_HEAD);
    if let Some(error) = error {
        page.push_str("<p class=\"error\">");
        page.push_str(&escape(error));
        page.push_str("</p>\n");
    }
    page.push_str("</body>\n</html>\n");
    page
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
