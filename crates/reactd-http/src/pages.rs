//! Built-in HTML pages, used when no UI directory is configured.

pub const LOGIN_FORM: &str = r#"<!DOCTYPE html>
<html>
<head><title>Login</title></head>
<body>
  <h2>Login</h2>
  <form action="/login" method="post">
    <label>Username <input type="text" name="username"></label><br>
    <label>Password <input type="password" name="password"></label><br>
    <input type="submit" value="Login">
  </form>
  <p><a href="/register">Create an account</a></p>
</body>
</html>
"#;

pub const REGISTER_FORM: &str = r#"<!DOCTYPE html>
<html>
<head><title>Register</title></head>
<body>
  <h2>Register</h2>
  <form action="/register" method="post">
    <label>Username <input type="text" name="username"></label><br>
    <label>Password <input type="password" name="password"></label><br>
    <input type="submit" value="Register">
  </form>
</body>
</html>
"#;

pub const REGISTER_SUCCESS: &str = r#"<html>
<head>
  <title>Register Success</title>
  <script type="text/javascript">
    alert("Register Success!");
    window.location = "/login";
  </script>
</head>
<body>
  <h2>moving to login...</h2>
</body>
</html>
"#;

pub const LOGIN_SUCCESS: &str = "<html><body><h2>Login Successful</h2></body></html>";

pub const LOGIN_FAILED: &str = "<html><body><h2>Login Failed</h2></body></html>";
